//! Interface de linha de comando do pipeport baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (search, migrate, status)
//! e flags globais (--config, --catalog, --threads, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pipeport: migra workflows de um servidor de build legado para pipelines de CI.
#[derive(Debug, Parser)]
#[command(name = "pipeport", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./pipeport.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Catálogo do sistema de origem; substitui `[source].catalog`.
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Tamanho do pool de workers.
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Procura workflows cujo projeto contém o texto informado.
    Search {
        /// Texto a procurar (sem diferenciar maiúsculas).
        query: String,
    },

    /// Migra os workflows informados e mostra o status final.
    Migrate {
        /// IDs numéricos dos workflows de origem.
        #[arg(required = true)]
        ids: Vec<String>,

        /// Diretório onde os jobs gerados são gravados.
        #[arg(long, default_value = "pipelines")]
        out: PathBuf,

        /// Gera os scripts em memória e os imprime, sem gravar nada.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Mostra a configuração efetiva e a instância de origem.
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_migrate_subcommand() {
        let cli = Cli::parse_from(["pipeport", "migrate", "17", "18", "--out", "/tmp/jobs"]);
        match cli.command {
            Command::Migrate { ids, out, dry_run } => {
                assert_eq!(ids, vec!["17", "18"]);
                assert_eq!(out, PathBuf::from("/tmp/jobs"));
                assert!(!dry_run);
            }
            _ => panic!("expected Migrate command"),
        }
    }

    #[test]
    fn migrate_defaults_to_pipelines_dir() {
        let cli = Cli::parse_from(["pipeport", "migrate", "--dry-run", "17"]);
        match cli.command {
            Command::Migrate { out, dry_run, .. } => {
                assert_eq!(out, PathBuf::from("pipelines"));
                assert!(dry_run);
            }
            _ => panic!("expected Migrate command"),
        }
    }

    #[test]
    fn migrate_requires_ids() {
        assert!(Cli::try_parse_from(["pipeport", "migrate"]).is_err());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "pipeport",
            "--config",
            "custom.toml",
            "--threads",
            "3",
            "--verbose",
            "search",
            "payments",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.threads, Some(3));
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Command::Search { ref query } if query == "payments"));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}

//! Configuração do pipeport carregada a partir de `pipeport.toml`.
//!
//! A struct [`PipeportConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `PIPEPORT_THREADS` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resolve::{DEFAULT_MAX_LEN, DEFAULT_MAX_PASSES, ResolverLimits};
use crate::script::DEFAULT_INDENT_WIDTH;
use crate::source::SourceInstance;
use crate::translate::SynthesisOptions;

pub const CONFIG_FILE: &str = "pipeport.toml";
pub const THREADS_ENV: &str = "PIPEPORT_THREADS";

/// Configuração de nível superior carregada de `pipeport.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PipeportConfig {
    /// Tamanho sugerido do pool de workers.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Intervalo entre passadas do loop de controle, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Quanto tempo o shutdown espera pelos jobs em andamento.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    #[serde(default = "default_max_resolve_passes")]
    pub max_resolve_passes: usize,

    #[serde(default = "default_max_resolved_len")]
    pub max_resolved_len: usize,

    /// Espaços por nível de indentação no script gerado.
    #[serde(default = "default_indent_width")]
    pub indent_width: usize,

    /// Prefixo dos nomes de job criados no destino.
    #[serde(default = "default_job_prefix")]
    pub job_prefix: String,

    /// Parâmetro que escolhe o agente onde o pipeline roda.
    #[serde(default = "default_node_parameter")]
    pub node_parameter: String,

    #[serde(default = "default_sandbox")]
    pub sandbox: bool,

    #[serde(default)]
    pub source: SourceSettings,
}

/// Tabela `[source]`: onde fica o servidor de origem.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceSettings {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub credential_id: Option<String>,
    pub keystore_credential_id: Option<String>,
    /// Catálogo em arquivo (TOML ou JSON) usado como sistema de origem.
    pub catalog: Option<PathBuf>,
}

impl SourceSettings {
    pub fn instance(&self) -> SourceInstance {
        let port = self.port.map(|p| p.to_string());
        SourceInstance::new(
            self.hostname.as_deref(),
            port.as_deref(),
            self.credential_id.as_deref(),
            self.keystore_credential_id.as_deref(),
        )
    }
}

// Valor padrão para o pool: 5 workers.
fn default_threads() -> usize {
    5
}

// Valor padrão para o intervalo de polling: 5s.
fn default_poll_interval_ms() -> u64 {
    5000
}

// Valor padrão para a espera no shutdown: 1 hora.
fn default_shutdown_timeout_secs() -> u64 {
    3600
}

fn default_max_resolve_passes() -> usize {
    DEFAULT_MAX_PASSES
}

fn default_max_resolved_len() -> usize {
    DEFAULT_MAX_LEN
}

fn default_indent_width() -> usize {
    DEFAULT_INDENT_WIDTH
}

fn default_job_prefix() -> String {
    "A2J".to_string()
}

fn default_node_parameter() -> String {
    "A2J_NODE".to_string()
}

fn default_sandbox() -> bool {
    true
}

impl Default for PipeportConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_resolve_passes: default_max_resolve_passes(),
            max_resolved_len: default_max_resolved_len(),
            indent_width: default_indent_width(),
            job_prefix: default_job_prefix(),
            node_parameter: default_node_parameter(),
            sandbox: default_sandbox(),
            source: SourceSettings::default(),
        }
    }
}

impl PipeportConfig {
    /// Carrega a configuração de `path`, ou de `pipeport.toml` no diretório
    /// atual. Sem caminho explícito, um arquivo ausente significa defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::read(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        config.apply_threads_override(std::env::var(THREADS_ENV).ok().as_deref())?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str::<PipeportConfig>(&contents)
            .with_context(|| format!("parsing {}", path.display()))
    }

    fn apply_threads_override(&mut self, value: Option<&str>) -> Result<()> {
        if let Some(value) = value
            && !value.trim().is_empty()
        {
            self.threads = value
                .trim()
                .parse()
                .with_context(|| format!("{THREADS_ENV} must be a number, got {value:?}"))?;
        }
        Ok(())
    }

    /// O subconjunto usado em tempo de execução pelo engine.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            limits: ResolverLimits {
                max_passes: self.max_resolve_passes,
                max_len: self.max_resolved_len,
            },
            indent_width: self.indent_width,
            synthesis: SynthesisOptions {
                job_prefix: self.job_prefix.clone(),
                node_parameter: self.node_parameter.clone(),
            },
            sandbox: self.sandbox,
        }
    }
}

/// Parâmetros de execução do [`MigrateEngine`](crate::orchestrator::MigrateEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
    pub limits: ResolverLimits,
    pub indent_width: usize,
    pub synthesis: SynthesisOptions,
    pub sandbox: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        PipeportConfig::default().engine_settings()
    }
}

//! Interface de terminal do pipeport: spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`MigrationProgress`] acompanha visualmente
//! a execução das migrações no terminal.

use std::collections::BTreeMap;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use pipeport::source::SearchResults;
use pipeport::state_machine::JobSummary;

/// Indicador visual de progresso enquanto o engine trabalha.
///
/// Exibe um spinner com a contagem de jobs por status e, ao final, uma
/// tabela colorida: sucesso (verde), erro (vermelho), demais (amarelo).
pub struct MigrationProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl MigrationProgress {
    /// Inicia o spinner para `total` workflows submetidos.
    pub fn start(total: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("Migrating {total} workflow(s)..."));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem com quantos jobs estão em cada status.
    pub fn update(&self, jobs: &[JobSummary]) {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for job in jobs {
            let bucket = match job.status_text.split(':').next() {
                Some(head) => head,
                None => job.status_text.as_str(),
            };
            *counts.entry(bucket).or_default() += 1;
        }
        let parts: Vec<String> = counts.iter().map(|(k, n)| format!("{k}: {n}")).collect();
        self.pb.set_message(parts.join(" | "));
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }

    fn style_for(&self, job: &JobSummary) -> &Style {
        if job.is_error() {
            &self.red
        } else if job.status_text == "Success" {
            &self.green
        } else {
            &self.yellow
        }
    }

    /// Imprime a tabela de status (a mesma visão de `list_jobs`).
    pub fn print_table(&self, jobs: &[JobSummary]) {
        if jobs.is_empty() {
            println!("  {}", self.yellow.apply_to("No jobs were created."));
            return;
        }
        let name_width = jobs.iter().map(|j| j.display_name.len()).max().unwrap_or(0);
        let stage_width = jobs.iter().map(|j| j.stage_label.len()).max().unwrap_or(0);
        println!();
        for job in jobs {
            println!(
                "  {:<name_width$}  {:<stage_width$}  {}",
                job.display_name,
                job.stage_label,
                self.style_for(job).apply_to(&job.status_text),
            );
        }
    }

    /// Imprime um script gerado (modo `--dry-run`).
    pub fn print_script(&self, name: &str, script: &str) {
        println!();
        println!("{}", self.green.apply_to(format!("─── {name} ───")));
        print!("{script}");
    }
}

/// Imprime os resultados de busca como `projeto / workflow (id)`.
pub fn print_search(results: &SearchResults) {
    if results.is_empty() {
        println!("No matching projects.");
        return;
    }
    let bold = Style::new().bold();
    for (project, workflows) in results {
        for (name, id) in workflows {
            println!("{} / {name} ({id})", bold.apply_to(project));
        }
    }
}

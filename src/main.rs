//! Audit Extractor - incremental batch run over a directory of audit PDFs.

use anyhow::{Context, Result};
use audit_extractor::aggregate::AggregateOutput;
use audit_extractor::config::{create_default_config, ConfigStore, Settings, TemplateConfig};
use audit_extractor::pdf::{ProviderKind, TextProvider};
use audit_extractor::pipeline::{Pipeline, RunOptions};
use audit_extractor::reference::{load_questions, load_scoring_reference};
use audit_extractor::scoring::{dealer_scoring, verbatim, write_sheet};
use audit_extractor::source::LocalDirSource;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEALER_SCORING_FILE: &str = "dealer_scoring.csv";
const VERBATIM_FILE: &str = "verbatim.csv";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audit_extractor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let configs = if settings.config_dir.exists() {
        ConfigStore::load_from_dir(&settings.config_dir)?
    } else {
        warn!(
            "Config directory {:?} not found, using built-in template",
            settings.config_dir
        );
        ConfigStore::from_configs(vec![create_default_config()])?
    };
    info!("Loaded {} configs: {:?}", configs.list().len(), configs.list());

    let template = select_template(&configs, settings.template.as_deref())?;

    let questions = load_questions(&settings.questions_path)
        .with_context(|| format!("Failed to load questions from {:?}", settings.questions_path))?;

    let kind = ProviderKind::from_name(&settings.text_provider).with_context(|| {
        format!("Unknown text provider: {}", settings.text_provider)
    })?;
    let provider: Arc<dyn TextProvider> = Arc::from(kind.build());
    info!("Using text provider: {}", provider.name());
    let pipeline = Pipeline::new(template, questions, provider).with_options(RunOptions {
        max_workers: settings.max_workers,
        report_timeout: settings.report_timeout,
    });

    let mut aggregate = AggregateOutput::load(&settings.output_dir)
        .with_context(|| format!("Failed to load aggregate from {:?}", settings.output_dir))?;

    let source = LocalDirSource::new(&settings.input_dir);
    let summary = pipeline.run(&source, &mut aggregate).await?;
    info!("{:?}", summary);

    aggregate
        .write(&settings.output_dir)
        .with_context(|| format!("Failed to write aggregate to {:?}", settings.output_dir))?;

    if settings.write_scoring {
        write_scoring(&settings, pipeline.template(), &aggregate)?;
    }

    Ok(())
}

fn select_template(configs: &ConfigStore, name: Option<&str>) -> Result<TemplateConfig> {
    match name {
        Some(name) => configs.get(name).cloned().with_context(|| {
            format!("Unknown template: {}. Available: {:?}", name, configs.list())
        }),
        None => Ok(configs.default_config().clone()),
    }
}

fn write_scoring(
    settings: &Settings,
    template: &TemplateConfig,
    aggregate: &AggregateOutput,
) -> Result<()> {
    let reference = match &settings.scoring_path {
        Some(path) => Some(
            load_scoring_reference(path)
                .with_context(|| format!("Failed to load scoring reference from {:?}", path))?,
        ),
        None => None,
    };

    write_sheet(
        &settings.output_dir.join(DEALER_SCORING_FILE),
        &dealer_scoring(aggregate, template, reference.as_ref()),
    )?;
    write_sheet(
        &settings.output_dir.join(VERBATIM_FILE),
        &verbatim(aggregate),
    )?;
    Ok(())
}

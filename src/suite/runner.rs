use std::fs;
use std::path::Path;
use tracing::info;

use crate::elements::ElementSet;
use crate::engine::SessionEngine;
use crate::persona::{Persona, load_personas};
use crate::session::{RUN_METADATA_FILE, RunDirectory};
use crate::snapshot::{CaptureBackend, StaticImageBackend, WireframeBackend};
use crate::suite::report::{SuiteReport, VariantRun};
use crate::suite::types::{SuiteConfig, SuiteError, SuiteResult, VariantConfig};
use crate::vlm::InferenceService;

/// Markdown rendering of the report, next to `report.json`
const REPORT_MARKDOWN_FILE: &str = "report.md";

/// Runs every variant of a suite, one after the other
pub struct SuiteRunner<'a> {
    config: SuiteConfig,
    service: &'a dyn InferenceService,
    run: RunDirectory,
}

impl<'a> SuiteRunner<'a> {
    pub fn new(config: SuiteConfig, service: &'a dyn InferenceService, run: RunDirectory) -> Self {
        Self { config, service, run }
    }

    pub fn run_directory(&self) -> &RunDirectory {
        &self.run
    }

    /// Run the suite and write `report.json`.
    ///
    /// Variants run strictly in configuration order; each batch owns its
    /// element set and capture backend.
    pub fn run(&self) -> SuiteResult<SuiteReport> {
        let config = &self.config;
        let personas = load_personas(&config.personas_dir, config.persona_count, config.seed)?;

        let metadata = serde_json::to_value(config).map_err(|source| SuiteError::InvalidJson {
            path: self.run.dir.join(RUN_METADATA_FILE),
            source,
        })?;
        self.run.init(&metadata).map_err(|source| SuiteError::Io {
            path: self.run.dir.clone(),
            source,
        })?;
        info!(
            run_id = %self.run.id,
            dir = %self.run.dir.display(),
            personas = personas.len(),
            variants = config.variants.len(),
            iterations = config.iterations,
            "Starting suite"
        );

        let engine = SessionEngine::new(
            self.service,
            &self.run,
            config.task.clone(),
            config.engine_settings(),
        )
        .with_prompts(config.prompt_builder());

        let mut runs = Vec::with_capacity(config.variants.len());
        for variant in &config.variants {
            runs.push(self.run_variant(&engine, variant, &personas)?);
        }

        let report = SuiteReport::build(&self.run.id, config, &personas, &runs);
        self.write_report(&report)?;
        Ok(report)
    }

    fn run_variant(
        &self,
        engine: &SessionEngine<'_>,
        variant: &VariantConfig,
        personas: &[Persona],
    ) -> SuiteResult<VariantRun> {
        let elements = ElementSet::load(&variant.elements)?;
        self.config.task.check_reachability(&variant.label, &elements);

        let mut capture: Box<dyn CaptureBackend> = match &variant.image {
            Some(path) => Box::new(StaticImageBackend::open(path)?),
            None => Box::new(WireframeBackend::new(&variant.label, &elements)),
        };
        info!(
            variant = %variant.label,
            name = variant.display_name(),
            elements = elements.len(),
            source = capture.source_type(),
            "Running variant"
        );

        let mut results = Vec::with_capacity(personas.len() * self.config.iterations as usize);
        for persona in personas {
            for iteration in 1..=self.config.iterations {
                let result =
                    engine.run_session(persona, &variant.label, &elements, capture.as_mut(), iteration)?;
                results.push(result);
            }
        }

        let converted = results.iter().filter(|r| r.success).count();
        info!(variant = %variant.label, sessions = results.len(), converted, "Variant finished");

        Ok(VariantRun {
            label: variant.label.clone(),
            name: variant.display_name().to_string(),
            results,
        })
    }

    fn write_report(&self, report: &SuiteReport) -> SuiteResult<()> {
        let path = self.run.report_path();
        let json = serde_json::to_string_pretty(report).map_err(|source| SuiteError::InvalidJson {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(io_error(&path))?;

        let markdown_path = self.run.dir.join(REPORT_MARKDOWN_FILE);
        fs::write(&markdown_path, report.to_markdown()).map_err(io_error(&markdown_path))?;

        info!(report = %path.display(), "Wrote suite report");
        Ok(())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SuiteError {
    let path = path.to_path_buf();
    move |source| SuiteError::Io { path, source }
}

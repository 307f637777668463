// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
};

#[derive(Debug, Deserialize, Clone)]
struct LoggerConfig {
    logger: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
enum Output {
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
enum RotationFreq {
    Minutely,
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Deserialize, Clone)]
struct LogFileConfig {
    path: String,
    #[serde(default)]
    rotation_frequency: Option<RotationFreq>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct LogConfig {
    level: String,
    output: Output,
    json: bool,
    is_show_line: bool,
    is_show_target: bool,
    file: Option<LogFileConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: Output::Stdout,
            json: false,
            is_show_line: false,
            is_show_target: true,
            file: None,
        }
    }
}

/// Installs the global tracing subscriber from a YAML logger config.
///
/// A missing config file falls back to defaults (info level, stdout). The
/// returned guard must stay alive for the duration of the program, otherwise
/// buffered log lines are lost.
pub fn init_logger(config_path: &str) -> Result<WorkerGuard> {
    let config = if Path::new(config_path).exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read logger config {config_path}"))?;
        serde_yaml::from_str::<LoggerConfig>(&content)
            .with_context(|| format!("failed to parse logger config {config_path}"))?
            .logger
    } else {
        LogConfig::default()
    };

    let (writer, guard) = make_writer(&config)?;

    let env_filter = EnvFilter::try_new(&config.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to parse log level from config or env")?;

    if config.json {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(config.is_show_target)
            .with_line_number(config.is_show_line)
            .json();
        tracing::subscriber::set_global_default(
            Registry::default().with(env_filter).with(layer),
        )
        .context("failed to set global default subscriber")?;
    } else {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(config.is_show_target)
            .with_line_number(config.is_show_line);
        tracing::subscriber::set_global_default(
            Registry::default().with(env_filter).with(layer),
        )
        .context("failed to set global default subscriber")?;
    }

    Ok(guard)
}

fn make_writer(cfg: &LogConfig) -> Result<(BoxMakeWriter, WorkerGuard)> {
    Ok(match cfg.output {
        Output::Stdout => {
            let (w, g) = tracing_appender::non_blocking(std::io::stdout());
            (BoxMakeWriter::new(w), g)
        },
        Output::Stderr => {
            let (w, g) = tracing_appender::non_blocking(std::io::stderr());
            (BoxMakeWriter::new(w), g)
        },
        Output::File => {
            let fcfg = cfg
                .file
                .clone()
                .context("logger.file is required for output=file")?;
            let path = PathBuf::from(&fcfg.path);
            let dir = path.parent().unwrap_or_else(|| Path::new(""));

            let rotation = match fcfg.rotation_frequency.unwrap_or(RotationFreq::Never) {
                RotationFreq::Minutely => Rotation::MINUTELY,
                RotationFreq::Hourly => Rotation::HOURLY,
                RotationFreq::Daily => Rotation::DAILY,
                RotationFreq::Never => Rotation::NEVER,
            };

            let file_appender = RollingFileAppender::new(
                rotation,
                dir,
                path.file_name().unwrap_or_default(),
            );
            let (w, g) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(w), g)
        },
    })
}

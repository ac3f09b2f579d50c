//! # Configuration Module
//!
//! The boundary between the CLI and the core library: holds one run's
//! parameters, validates them with helpful messages, and converts into
//! [`FilterOptions`].
//!
//! Sections arrive from the CLI as `START:END` strings in microseconds and
//! are parsed here; dimension zero means "not requested" so the positional
//! `0 721` form can skip the width.

use std::path::PathBuf;

use crate::FilterOptions;
use crate::codec::section::Section;

/// Parameters for one filter run, as collected from the CLI.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Input video path.
    pub input: PathBuf,
    /// WGSL fragment shader path.
    pub shader: PathBuf,
    /// Output video path.
    pub output: PathBuf,
    /// Requested output width (`None` = derive).
    pub width: Option<u32>,
    /// Requested output height (`None` = derive).
    pub height: Option<u32>,
    /// Source sections to include, microseconds, in order.
    pub sections: Vec<Section>,
    /// Threaded pipeline shape instead of the inline loop.
    pub threaded: bool,
}

impl FilterConfig {
    pub fn new(
        input: PathBuf,
        shader: PathBuf,
        output: PathBuf,
        width: Option<u32>,
        height: Option<u32>,
        sections: Vec<Section>,
        threaded: bool,
    ) -> Self {
        Self {
            input,
            shader,
            output,
            width,
            height,
            sections,
            threaded,
        }
    }

    /// Validates the configuration, returning a user-facing message on the
    /// first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.output == self.input {
            return Err("output path must differ from the input path".to_string());
        }
        if self.output.as_os_str().is_empty() {
            return Err("output path must not be empty".to_string());
        }
        for section in &self.sections {
            if section.start < 0 {
                return Err(format!(
                    "section start {} must not be negative",
                    section.start
                ));
            }
            if section.start >= section.end {
                return Err(format!(
                    "section [{}, {}) is empty: start must precede end",
                    section.start, section.end
                ));
            }
        }
        Ok(())
    }

    pub fn to_filter_options(self) -> FilterOptions {
        FilterOptions {
            input: self.input,
            shader: self.shader,
            output: self.output,
            width: self.width,
            height: self.height,
            sections: self.sections,
            threaded: self.threaded,
        }
    }
}

/// Parses a `START:END` section argument (microseconds, half-open).
pub fn parse_section(text: &str) -> Result<Section, String> {
    let (start, end) = text
        .split_once(':')
        .ok_or_else(|| format!("invalid section '{text}': expected START:END in microseconds"))?;
    let start: i64 = start
        .trim()
        .parse()
        .map_err(|_| format!("invalid section start '{start}': expected an integer"))?;
    let end: i64 = end
        .trim()
        .parse()
        .map_err(|_| format!("invalid section end '{end}': expected an integer"))?;
    Ok(Section::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_sections(sections: Vec<Section>) -> FilterConfig {
        FilterConfig::new(
            PathBuf::from("in.mp4"),
            PathBuf::from("id.wgsl"),
            PathBuf::from("out.mp4"),
            None,
            None,
            sections,
            false,
        )
    }

    #[test]
    fn test_parse_section() {
        assert_eq!(
            parse_section("0:1000000"),
            Ok(Section::new(0, 1_000_000))
        );
        assert_eq!(
            parse_section("5000000:6000000"),
            Ok(Section::new(5_000_000, 6_000_000))
        );
    }

    #[test]
    fn test_parse_section_rejects_garbage() {
        assert!(parse_section("1000000").is_err());
        assert!(parse_section("a:b").is_err());
        assert!(parse_section("1.5:2").is_err());
    }

    #[test]
    fn test_validate_accepts_ordered_sections() {
        let config = config_with_sections(vec![
            Section::new(0, 1_000_000),
            Section::new(5_000_000, 6_000_000),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_and_negative_sections() {
        assert!(
            config_with_sections(vec![Section::new(2_000_000, 2_000_000)])
                .validate()
                .is_err()
        );
        assert!(
            config_with_sections(vec![Section::new(-1, 1_000_000)])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_validate_rejects_output_equal_to_input() {
        let mut config = config_with_sections(Vec::new());
        config.output = config.input.clone();
        assert!(config.validate().is_err());
    }
}

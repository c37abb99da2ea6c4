//! Parameter maps for the elastix engine.
//!
//! A parameter map is a set of `key -> [values]` entries. On disk it uses the
//! elastix text format, one `(Key value ...)` entry per line:
//!
//! ```text
//! (Transform "EulerTransform")
//! (MaximumNumberOfIterations 256)
//! (WriteResultImage "true")
//! ```
//!
//! Numbers are written bare; everything else is quoted.

use crate::error::{RegistrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Key controlling the order of the final resampling interpolator.
pub const FINAL_INTERPOLATION_ORDER: &str = "FinalBSplineInterpolationOrder";

/// Built-in transform presets, matching elastix's default parameter maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterPreset {
    Translation,
    Rigid,
    Affine,
    BSpline,
}

impl ParameterPreset {
    pub const ALL: [ParameterPreset; 4] = [
        ParameterPreset::Translation,
        ParameterPreset::Rigid,
        ParameterPreset::Affine,
        ParameterPreset::BSpline,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ParameterPreset::Translation => "translation",
            ParameterPreset::Rigid => "rigid",
            ParameterPreset::Affine => "affine",
            ParameterPreset::BSpline => "bspline",
        }
    }
}

impl fmt::Display for ParameterPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParameterPreset {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "translation" => Ok(ParameterPreset::Translation),
            "rigid" => Ok(ParameterPreset::Rigid),
            "affine" => Ok(ParameterPreset::Affine),
            "bspline" | "nonrigid" => Ok(ParameterPreset::BSpline),
            other => Err(RegistrationError::invalid_parameter(format!(
                "unknown preset '{}', expected one of translation, rigid, affine, bspline",
                other
            ))),
        }
    }
}

/// An elastix parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMap {
    entries: BTreeMap<String, Vec<String>>,
}

impl ParameterMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default map for a preset with four resolutions.
    pub fn preset(preset: ParameterPreset) -> Self {
        let mut map = Self::new();

        map.set_value("FixedImagePyramid", "FixedSmoothingImagePyramid");
        map.set_value("MovingImagePyramid", "MovingSmoothingImagePyramid");
        map.set_value("Interpolator", "LinearInterpolator");
        map.set_value("Optimizer", "AdaptiveStochasticGradientDescent");
        map.set_value("Resampler", "DefaultResampler");
        map.set_value("ResampleInterpolator", "FinalBSplineInterpolator");
        map.set_value(FINAL_INTERPOLATION_ORDER, "3");
        map.set_value("NumberOfResolutions", "4");
        map.set_value("WriteIterationInfo", "false");

        map.set_value("ImageSampler", "RandomCoordinate");
        map.set_value("NumberOfSpatialSamples", "2048");
        map.set_value("CheckNumberOfSamples", "true");
        map.set_value("MaximumNumberOfSamplingAttempts", "8");
        map.set_value("NewSamplesEveryIteration", "true");

        map.set_value("NumberOfSamplesForExactGradient", "4096");
        map.set_value("DefaultPixelValue", "0.0");
        map.set_value("AutomaticParameterEstimation", "true");

        map.set_value("WriteResultImage", "true");
        map.set_value("ResultImageFormat", "nii");

        map.set_value("MaximumNumberOfIterations", "256");

        match preset {
            ParameterPreset::Translation => {
                map.set_value("Registration", "MultiResolutionRegistration");
                map.set_value("Transform", "TranslationTransform");
                map.set_value("Metric", "AdvancedMattesMutualInformation");
                map.set_value("AutomaticTransformInitialization", "true");
            }
            ParameterPreset::Rigid => {
                map.set_value("Registration", "MultiResolutionRegistration");
                map.set_value("Transform", "EulerTransform");
                map.set_value("Metric", "AdvancedMattesMutualInformation");
                map.set_value("AutomaticScalesEstimation", "true");
            }
            ParameterPreset::Affine => {
                map.set_value("Registration", "MultiResolutionRegistration");
                map.set_value("Transform", "AffineTransform");
                map.set_value("Metric", "AdvancedMattesMutualInformation");
                map.set_value("AutomaticScalesEstimation", "true");
            }
            ParameterPreset::BSpline => {
                map.set_value("Registration", "MultiMetricMultiResolutionRegistration");
                map.set_value("Transform", "BSplineTransform");
                map.set(
                    "Metric",
                    ["AdvancedMattesMutualInformation", "TransformBendingEnergyPenalty"],
                );
                map.set_value("Metric0Weight", "1.0");
                map.set_value("Metric1Weight", "1.0");
                map.set_value("FinalGridSpacingInPhysicalUnits", "10.0");
                map.set("GridSpacingSchedule", ["8.0", "4.0", "2.0", "1.0"]);
                map.set_value("HowToCombineTransforms", "Compose");
            }
        }

        map
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// First value of `key`, the common case for scalar parameters.
    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Replace all values of `key`.
    pub fn set<K, I, V>(&mut self, key: K, values: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.entries
            .insert(key.into(), values.into_iter().map(Into::into).collect());
    }

    /// Set `key` to a single value.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), vec![value.into()]);
    }

    /// Set `key` only when it is not already present.
    pub fn set_default(&mut self, key: &str, value: &str) {
        if !self.contains(key) {
            self.set_value(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.remove(key)
    }

    /// Override the final resampling interpolation order (0 is nearest neighbour).
    pub fn with_interpolation_order(mut self, order: u32) -> Self {
        self.set_value(FINAL_INTERPOLATION_ORDER, order.to_string());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render in elastix text format.
    pub fn to_elastix_string(&self) -> String {
        let mut out = String::new();
        for (key, values) in &self.entries {
            out.push('(');
            out.push_str(key);
            for value in values {
                out.push(' ');
                if is_numeric(value) {
                    out.push_str(value);
                } else {
                    out.push('"');
                    out.push_str(value);
                    out.push('"');
                }
            }
            out.push_str(")\n");
        }
        out
    }

    /// Parse elastix text format. `//` starts a comment; blank lines are skipped.
    pub fn parse_elastix(text: &str) -> Result<Self> {
        let mut map = Self::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            let inner = line
                .strip_prefix('(')
                .and_then(|l| l.strip_suffix(')'))
                .ok_or_else(|| {
                    RegistrationError::invalid_parameter(format!(
                        "line {}: expected '(Key value ...)', got '{}'",
                        lineno + 1,
                        line
                    ))
                })?;

            let mut tokens = tokenize(inner).map_err(|msg| {
                RegistrationError::invalid_parameter(format!("line {}: {}", lineno + 1, msg))
            })?;
            if tokens.is_empty() {
                return Err(RegistrationError::invalid_parameter(format!(
                    "line {}: empty entry",
                    lineno + 1
                )));
            }
            let key = tokens.remove(0);
            map.entries.insert(key, tokens);
        }

        Ok(map)
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegistrationError::io(format!("read {}", path.display()), e))?;
        Self::parse_elastix(&text)
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_elastix_string())
            .map_err(|e| RegistrationError::io(format!("write {}", path.display()), e))
    }
}

impl From<ParameterPreset> for ParameterMap {
    fn from(preset: ParameterPreset) -> Self {
        ParameterMap::preset(preset)
    }
}

fn is_numeric(value: &str) -> bool {
    let leading_ok = value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    leading_ok && value.parse::<f64>().is_ok()
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let bytes = line.as_bytes();
    for i in 0..bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b'/' if !in_quotes && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn tokenize(s: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut token = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(ch) => token.push(ch),
                    None => return Err("unterminated quote".to_string()),
                }
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                token.push(ch);
                chars.next();
            }
            tokens.push(token);
        }
    }

    Ok(tokens)
}

//! Synthetic test execution: simulated plugin run time and test results.
//!
//! A request opts in with `cpfPluginTest`; the remaining `cpf*` parameters
//! shape how long the simulated execution takes and how many results a
//! list-result application produces when the plugin returns none.

use std::time::Duration;

use rand::Rng;
use serde_json::Value;

use crate::domain::errors::PluginError;
use crate::domain::models::{FieldSpec, Record};

const PLUGIN_TEST: &str = "cpfPluginTest";
const MIN_EXECUTION_TIME: &str = "cpfMinExecutionTime";
const MAX_EXECUTION_TIME: &str = "cpfMaxExecutionTime";
const MEAN_EXECUTION_TIME: &str = "cpfMeanExecutionTime";
const STANDARD_DEVIATION: &str = "cpfStandardDeviation";
const MEAN_NUM_RESULTS: &str = "cpfMeanNumResults";

/// Longest simulated execution, in seconds.
pub const MAX_EXECUTION_SECONDS: f64 = 3600.0;
/// Largest number of synthetic results one request may ask for.
pub const MAX_RESULTS: usize = 10_000;

const TEST_PARAMETERS: [&str; 6] = [
    PLUGIN_TEST,
    MIN_EXECUTION_TIME,
    MAX_EXECUTION_TIME,
    MEAN_EXECUTION_TIME,
    STANDARD_DEVIATION,
    MEAN_NUM_RESULTS,
];

/// Test-execution settings of one request, all times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticExecution {
    min_time: f64,
    max_time: f64,
    mean_time: f64,
    standard_deviation: f64,
    mean_num_results: f64,
}

impl Default for SyntheticExecution {
    fn default() -> Self {
        Self {
            min_time: -1.0,
            max_time: -1.0,
            mean_time: -1.0,
            standard_deviation: -1.0,
            mean_num_results: 3.0,
        }
    }
}

fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "on" | "1"
        ),
        _ => false,
    }
}

fn number(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Sample a normal distribution (Box-Muller).
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, standard_deviation: f64) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    mean + z * standard_deviation
}

impl SyntheticExecution {
    /// Remove the test parameters from `parameters`; returns the settings if
    /// the request opted in to test execution.
    ///
    /// Values that are not finite, or above [`MAX_EXECUTION_SECONDS`] and
    /// [`MAX_RESULTS`], are bad input for the request.
    pub fn take_from(parameters: &mut Record) -> Result<Option<Self>, PluginError> {
        let opted_in = parameters.get(PLUGIN_TEST).is_some_and(is_true);
        let settings = Self {
            min_time: number(parameters.get(MIN_EXECUTION_TIME), -1.0),
            max_time: number(parameters.get(MAX_EXECUTION_TIME), -1.0),
            mean_time: number(parameters.get(MEAN_EXECUTION_TIME), -1.0),
            standard_deviation: number(parameters.get(STANDARD_DEVIATION), -1.0),
            mean_num_results: number(parameters.get(MEAN_NUM_RESULTS), 3.0),
        };
        for key in TEST_PARAMETERS {
            parameters.remove(key);
        }
        if !opted_in {
            return Ok(None);
        }
        settings.validate()?;
        Ok(Some(settings))
    }

    fn validate(&self) -> Result<(), PluginError> {
        let times = [
            (MIN_EXECUTION_TIME, self.min_time),
            (MAX_EXECUTION_TIME, self.max_time),
            (MEAN_EXECUTION_TIME, self.mean_time),
            (STANDARD_DEVIATION, self.standard_deviation),
        ];
        for (name, value) in times {
            if !value.is_finite() || value > MAX_EXECUTION_SECONDS {
                return Err(PluginError::BadInputData(format!(
                    "{name} must be a number of at most {MAX_EXECUTION_SECONDS} seconds, got {value}"
                )));
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let max_results = MAX_RESULTS as f64;
        if !self.mean_num_results.is_finite() || self.mean_num_results > max_results {
            return Err(PluginError::BadInputData(format!(
                "{MEAN_NUM_RESULTS} must be a number of at most {MAX_RESULTS}, got {}",
                self.mean_num_results
            )));
        }
        Ok(())
    }

    /// How long the simulated execution takes.
    ///
    /// Uniform in `[min, max]` without a deviation (min defaults to 0, max to
    /// min + 10), gaussian otherwise, clamped to the bounds that are set.
    pub fn execution_time<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let mut min_time = self.min_time;
        let mut max_time = self.max_time;
        let mut seconds = if self.standard_deviation <= 0.0 {
            if min_time < 0.0 {
                min_time = 0.0;
            }
            if max_time < min_time {
                max_time = min_time + 10.0;
            }
            if max_time > min_time {
                rng.gen_range(min_time..=max_time)
            } else {
                min_time
            }
        } else {
            gaussian(rng, self.mean_time, self.standard_deviation)
        };
        if min_time >= 0.0 && seconds < min_time {
            seconds = min_time;
        }
        if max_time > 0.0 && max_time > min_time && seconds > max_time {
            seconds = max_time;
        }
        if seconds.is_finite() && seconds > 0.0 {
            Duration::try_from_secs_f64(seconds.min(MAX_EXECUTION_SECONDS)).unwrap_or_default()
        } else {
            Duration::ZERO
        }
    }

    /// Number of synthetic results for a list-result application, at most
    /// [`MAX_RESULTS`].
    pub fn result_count<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let mean = self.mean_num_results;
        let count = gaussian(rng, mean, mean / 5.0).round();
        if count.is_finite() && count > 0.0 {
            // bounded by the finite check; truncation is intended
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let count = count as usize;
            count.min(MAX_RESULTS)
        } else {
            0
        }
    }
}

/// Fill every declared result field missing from `record` with its test value.
pub fn fill_test_values(fields: &[FieldSpec], record: &mut Record) {
    for field in fields {
        let missing = record.get(&field.name).is_none_or(Value::is_null);
        if missing {
            record.insert(field.name.clone(), field.field_type.test_value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::FieldType;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn params(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_take_from_requires_opt_in() {
        let mut p = params(json!({"x": 1, "cpfMinExecutionTime": 2}));
        assert!(SyntheticExecution::take_from(&mut p).unwrap().is_none());
        assert_eq!(p, params(json!({"x": 1})));

        let mut p = params(json!({"x": 1, "cpfPluginTest": "true"}));
        assert!(SyntheticExecution::take_from(&mut p).unwrap().is_some());
        assert!(!p.contains_key("cpfPluginTest"));
    }

    #[test]
    fn test_uniform_delay_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut p = params(json!({
            "cpfPluginTest": true,
            "cpfMinExecutionTime": "0.5",
            "cpfMaxExecutionTime": 1.5
        }));
        let synthetic = SyntheticExecution::take_from(&mut p).unwrap().unwrap();
        for _ in 0..100 {
            let d = synthetic.execution_time(&mut rng).as_secs_f64();
            assert!((0.5..=1.5).contains(&d), "{d}");
        }
    }

    #[test]
    fn test_default_delay_is_zero_to_ten_seconds() {
        let mut rng = StdRng::seed_from_u64(1);
        let synthetic = SyntheticExecution::default();
        for _ in 0..100 {
            assert!(synthetic.execution_time(&mut rng) <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_gaussian_delay_is_clamped() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut p = params(json!({
            "cpfPluginTest": true,
            "cpfMinExecutionTime": 1,
            "cpfMaxExecutionTime": 2,
            "cpfMeanExecutionTime": 1.5,
            "cpfStandardDeviation": 5
        }));
        let synthetic = SyntheticExecution::take_from(&mut p).unwrap().unwrap();
        for _ in 0..100 {
            let d = synthetic.execution_time(&mut rng).as_secs_f64();
            assert!((1.0..=2.0).contains(&d), "{d}");
        }
    }

    #[test]
    fn test_result_count_is_near_mean() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut p = params(json!({"cpfPluginTest": 1, "cpfMeanNumResults": 10}));
        let synthetic = SyntheticExecution::take_from(&mut p).unwrap().unwrap();
        let total: usize = (0..200).map(|_| synthetic.result_count(&mut rng)).sum();
        let mean = total as f64 / 200.0;
        assert!((8.0..=12.0).contains(&mean), "{mean}");
    }

    #[test]
    fn test_out_of_range_values_are_bad_input() {
        for bad in [
            json!({"cpfPluginTest": true, "cpfMinExecutionTime": 1e300}),
            json!({"cpfPluginTest": true, "cpfMaxExecutionTime": "inf"}),
            json!({"cpfPluginTest": true, "cpfStandardDeviation": 7200}),
            json!({"cpfPluginTest": true, "cpfMeanNumResults": 1e12}),
        ] {
            let mut p = params(bad.clone());
            let err = SyntheticExecution::take_from(&mut p).unwrap_err();
            assert!(matches!(err, PluginError::BadInputData(_)), "{bad}");
            assert!(p.is_empty(), "test parameters are removed even when rejected");
        }

        // ignored unless the request opts in
        let mut p = params(json!({"cpfMinExecutionTime": 1e300}));
        assert!(SyntheticExecution::take_from(&mut p).unwrap().is_none());
    }

    #[test]
    fn test_wide_gaussian_delay_is_capped() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut p = params(json!({
            "cpfPluginTest": true,
            "cpfMeanExecutionTime": 3600,
            "cpfStandardDeviation": 3600
        }));
        let synthetic = SyntheticExecution::take_from(&mut p).unwrap().unwrap();
        for _ in 0..100 {
            assert!(synthetic.execution_time(&mut rng) <= Duration::from_secs(3600));
        }
    }

    #[test]
    fn test_result_count_is_capped() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut p = params(json!({"cpfPluginTest": true, "cpfMeanNumResults": 10_000}));
        let synthetic = SyntheticExecution::take_from(&mut p).unwrap().unwrap();
        for _ in 0..50 {
            assert!(synthetic.result_count(&mut rng) <= MAX_RESULTS);
        }
    }

    #[test]
    fn test_fill_test_values() {
        let fields = vec![
            FieldSpec::new("label", FieldType::String),
            FieldSpec::new("count", FieldType::Integer),
        ];
        let mut record = params(json!({"label": "kept", "count": null}));
        fill_test_values(&fields, &mut record);
        assert_eq!(record["label"], json!("kept"));
        assert_eq!(record["count"], json!(1));
    }
}

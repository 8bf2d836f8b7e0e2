//! Eval command implementation

use super::output;
use super::session::{Session, SessionConfig, parse_instant};
use anyhow::{Context, Result, bail};
use log::info;
use medlogic_eval::CohortResult;
use medlogic_types::{
    Aggregation, ArgValue, Cohort, Duration, LogicCriteria, LogicResult, PatientId, RuleArgs,
};
use serde_json::{Value, json};
use std::path::PathBuf;

/// Configuration for eval command
pub struct EvalConfig {
    pub session: SessionConfig,
    pub tokens: Vec<String>,
    /// Criteria in text form, evaluated after the tokens
    pub queries: Vec<String>,
    /// Evaluate a single patient instead of the whole bundle
    pub patient: Option<PatientId>,
    pub args: Vec<String>,
    pub aggregate: Option<String>,
    pub as_of: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub within: Option<String>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    pub concurrent: bool,
    pub output_format: Option<String>,
    pub output_file: Option<PathBuf>,
}

/// Evaluate tokens for one patient or the whole bundle
///
/// Arguments and restriction flags are added to every token and query.
pub async fn eval(config: EvalConfig) -> Result<()> {
    if config.tokens.is_empty() && config.queries.is_empty() {
        bail!("No tokens or queries given");
    }
    let session = Session::open(&config.session)?;
    let args = parse_args(&config.args)?;

    let mut bases: Vec<LogicCriteria> = config.tokens.iter().map(LogicCriteria::new).collect();
    for query in &config.queries {
        let parsed = session
            .service
            .parse_criteria(query)
            .with_context(|| format!("Invalid query '{query}'"))?;
        bases.push(parsed);
    }
    let criteria = bases
        .into_iter()
        .map(|base| build_criteria(base, &args, &config))
        .collect::<Result<Vec<_>>>()?;

    let cohort = match config.patient {
        Some(id) => {
            let patient = session
                .bundle
                .patient(id)
                .with_context(|| format!("Patient {id} is not in the data bundle"))?;
            std::iter::once(patient.clone()).collect()
        }
        None => session.bundle.cohort(),
    };
    info!(
        "Evaluating {} token(s) for {} patient(s)",
        criteria.len(),
        cohort.len()
    );

    let outcome = if config.concurrent {
        session
            .service
            .eval_cohort_criteria_concurrent(&cohort, criteria)
            .await?
    } else {
        session.service.eval_cohort_criteria(&cohort, &criteria)?
    };

    for failure in &outcome.failures {
        eprintln!(
            "{}",
            output::format_warning(&format!(
                "patient {} / {}: {} [{}]",
                failure.patient_id, failure.token, failure.error, failure.code
            ))
        );
    }

    let rows = result_rows(&session, &cohort, &outcome);
    let format = output::OutputFormat::parse(config.output_format.as_deref().unwrap_or("pretty"));
    output::print_output(&Value::Array(rows), format, config.output_file.as_deref())
}

fn result_rows(
    session: &Session,
    cohort: &Cohort,
    outcome: &CohortResult,
) -> Vec<Value> {
    let mut rows = Vec::new();
    for patient in cohort.iter() {
        let Some(patient_results) = outcome.results.get(&patient.id) else {
            continue;
        };
        for (label, result) in patient_results {
            rows.push(json!({
                "patient": patient.id,
                "token": label,
                "result": result,
                "date": result_date(result),
                "true": session.service.to_boolean(result),
            }));
        }
    }
    rows
}

fn result_date(result: &LogicResult) -> Value {
    result
        .result_date()
        .map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d").to_string()))
}

fn build_criteria(base: LogicCriteria, args: &RuleArgs, config: &EvalConfig) -> Result<LogicCriteria> {
    let mut criteria = base.with_parameters(args.clone());
    if let Some(aggregate) = &config.aggregate {
        let aggregation: Aggregation = aggregate
            .parse()
            .with_context(|| format!("Invalid aggregation '{aggregate}'"))?;
        criteria = criteria.with_aggregation(aggregation);
    }
    if let Some(date) = &config.as_of {
        criteria = criteria.as_of(parse_instant(date)?);
    }
    if let Some(date) = &config.before {
        criteria = criteria.before(parse_instant(date)?);
    }
    if let Some(date) = &config.after {
        criteria = criteria.after(parse_instant(date)?);
    }
    if let Some(within) = &config.within {
        let duration: Duration = within
            .parse()
            .with_context(|| format!("Invalid duration '{within}'. Expected e.g. '6 months'"))?;
        criteria = criteria.within(duration);
    }
    if let Some(v) = config.gt {
        criteria = criteria.gt(v);
    }
    if let Some(v) = config.lt {
        criteria = criteria.lt(v);
    }
    Ok(criteria)
}

/// Parse argument strings (name=value) into rule arguments
fn parse_args(args: &[String]) -> Result<RuleArgs> {
    let mut result = RuleArgs::new();

    for arg in args {
        let Some((name, value)) = arg.split_once('=') else {
            bail!("Invalid argument format: '{arg}'. Expected 'name=value'");
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("Invalid argument format: '{arg}'. Missing name");
        }
        let value = value.trim();

        let value = if let Ok(n) = value.parse::<i64>() {
            ArgValue::Integer(n)
        } else if let Ok(n) = value.parse::<f64>() {
            ArgValue::Number(n)
        } else if value == "true" || value == "false" {
            ArgValue::Boolean(value == "true")
        } else if let Some(date) = value.strip_prefix('@') {
            ArgValue::Date(parse_instant(date)?)
        } else {
            ArgValue::Text(value.to_string())
        };

        result.insert(name, value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn base_config() -> EvalConfig {
        EvalConfig {
            session: SessionConfig::default(),
            tokens: vec!["CD4 COUNT".to_string()],
            queries: Vec::new(),
            patient: None,
            args: Vec::new(),
            aggregate: None,
            as_of: None,
            before: None,
            after: None,
            within: None,
            gt: None,
            lt: None,
            concurrent: false,
            output_format: None,
            output_file: None,
        }
    }

    #[test]
    fn test_parse_args() {
        let args = vec![
            "units=months".to_string(),
            "count=3".to_string(),
            "active=true".to_string(),
            "threshold=98.5".to_string(),
            "since=@2024-01-01".to_string(),
        ];

        let result = parse_args(&args).unwrap();

        assert_eq!(result.get("units"), Some(&ArgValue::Text("months".to_string())));
        assert_eq!(result.get("count"), Some(&ArgValue::Integer(3)));
        assert_eq!(result.get("active"), Some(&ArgValue::Boolean(true)));
        assert_eq!(result.get("threshold"), Some(&ArgValue::Number(98.5)));
        assert_eq!(
            result.get("since"),
            Some(&ArgValue::Date(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
        );
    }

    #[test]
    fn test_parse_args_invalid() {
        assert!(parse_args(&["units".to_string()]).is_err());
        assert!(parse_args(&["=months".to_string()]).is_err());
    }

    #[test]
    fn test_build_criteria() {
        let mut config = base_config();
        config.aggregate = Some("last:2".to_string());
        config.within = Some("6 months".to_string());
        config.gt = Some(200.0);

        let criteria = build_criteria(LogicCriteria::new("CD4 COUNT"), &RuleArgs::new(), &config)
            .unwrap();
        assert_eq!(criteria.to_string(), "LAST 2 CD4 COUNT WITHIN 6 months > 200");
    }

    #[test]
    fn test_build_criteria_combines_bounds() {
        let mut config = base_config();
        config.gt = Some(100.0);
        config.lt = Some(500.0);

        let criteria = build_criteria(LogicCriteria::new("CD4 COUNT"), &RuleArgs::new(), &config)
            .unwrap();
        assert_eq!(criteria.to_string(), "CD4 COUNT > 100 < 500");
    }

    #[test]
    fn test_build_criteria_extends_query() {
        let mut config = base_config();
        config.within = Some("2 years".to_string());
        let base: LogicCriteria = "COUNT {CD4 COUNT} < 200 OR > 1000".parse().unwrap();

        let criteria = build_criteria(base, &RuleArgs::new(), &config).unwrap();
        assert_eq!(criteria.to_string(), "COUNT {CD4 COUNT} (< 200 OR > 1000) WITHIN 2 years");
    }

    #[test]
    fn test_build_criteria_rejects_bad_input() {
        let mut config = base_config();
        config.aggregate = Some("median".to_string());
        assert!(build_criteria(LogicCriteria::new("CD4 COUNT"), &RuleArgs::new(), &config).is_err());

        let mut config = base_config();
        config.within = Some("6 fortnights".to_string());
        assert!(build_criteria(LogicCriteria::new("CD4 COUNT"), &RuleArgs::new(), &config).is_err());
    }
}

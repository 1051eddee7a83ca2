//! `run` subcommand: execute a snippet through the full engine pipeline.

use std::sync::Arc;

use super::exit;
use crate::config::EnvConfig;
use crate::engine::{EngineError, ErrorCategory, ExecutionEngine};
use crate::exec::ExecutionResult;

/// Parsed `run` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    pub source: String,
    pub packages: Vec<String>,
    pub session_id: Option<String>,
    pub json: bool,
}

/// Parse arguments following `run`.
pub fn parse_run_args(args: &[String]) -> Result<RunArgs, String> {
    let mut parsed = RunArgs::default();
    let mut source = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--package" | "-p" => {
                let name = iter.next().ok_or("--package requires a value")?;
                parsed.packages.push(name.clone());
            }
            "--session" => {
                let id = iter.next().ok_or("--session requires a value")?;
                parsed.session_id = Some(id.clone());
            }
            "--json" => parsed.json = true,
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            path => {
                if source.replace(path.to_string()).is_some() {
                    return Err("only one source file may be given".to_string());
                }
            }
        }
    }

    parsed.source = source.ok_or("missing source file (use - for stdin)")?;
    Ok(parsed)
}

/// Run one session. Ctrl-C force-cleans it before exiting.
pub async fn run_session(config: &EnvConfig, args: RunArgs) -> i32 {
    let code = match super::read_source(&args.source) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", args.source, e);
            return exit::USAGE;
        }
    };

    let engine = Arc::new(ExecutionEngine::new(config.engine_config()));
    let task = {
        let engine = engine.clone();
        let (session_id, packages) = (args.session_id.clone(), args.packages.clone());
        tokio::spawn(async move { engine.create_session(session_id, packages, &code).await })
    };
    tokio::pin!(task);

    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted; cleaning up");
            engine.shutdown(std::time::Duration::ZERO).await;
            task.await
        }
    };

    match joined {
        Ok(Ok(result)) => report_result(&result, args.json),
        Ok(Err(err)) => report_error(&err, args.json),
        Err(e) => {
            eprintln!("Error: session task failed: {}", e);
            exit::FAILURE
        }
    }
}

fn report_result(result: &ExecutionResult, json: bool) -> i32 {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else {
        print!("{}", result.output);
        if let Some(errors) = &result.errors {
            eprint!("{}", errors);
        }
        if let Some(failure) = &result.failure {
            eprintln!("Execution failed: {} ({}ms)", failure, result.duration_ms);
        }
    }
    if result.success {
        exit::SUCCESS
    } else {
        exit::FAILURE
    }
}

fn report_error(err: &EngineError, json: bool) -> i32 {
    if json {
        let body = serde_json::json!({
            "error": err.to_string(),
            "category": err.category(),
            "retryable": err.is_retryable(),
            "scan": err.scan(),
        });
        println!("{}", body);
    } else {
        eprintln!("Error: {}", err);
        if let Some(scan) = err.scan() {
            for issue in &scan.issues {
                eprintln!(
                    "  [{}] {}: {}",
                    issue.severity.as_str(),
                    issue.kind.as_str(),
                    issue.description
                );
            }
        }
    }
    match err.category() {
        ErrorCategory::Rejected => exit::REJECTED,
        ErrorCategory::Unavailable => exit::UNAVAILABLE,
        ErrorCategory::Failed => exit::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full() {
        let parsed = parse_run_args(&args(&[
            "main.js", "--package", "lodash", "-p", "dayjs", "--session", "abc", "--json",
        ]))
        .unwrap();
        assert_eq!(parsed.source, "main.js");
        assert_eq!(parsed.packages, vec!["lodash", "dayjs"]);
        assert_eq!(parsed.session_id.as_deref(), Some("abc"));
        assert!(parsed.json);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_run_args(&args(&[])).is_err());
        assert!(parse_run_args(&args(&["a.js", "b.js"])).is_err());
        assert!(parse_run_args(&args(&["a.js", "--package"])).is_err());
        assert!(parse_run_args(&args(&["a.js", "--bogus"])).is_err());
    }

    #[test]
    fn test_stdin_source() {
        assert_eq!(parse_run_args(&args(&["-"])).unwrap().source, "-");
    }
}

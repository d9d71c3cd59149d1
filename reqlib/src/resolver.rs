//! Command resolution: stage lookup, variable merge, substitution, the HTTP
//! call and optional extraction.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::extract::extract;
use crate::mapping::{value_to_var_string, ReqFile, DEFAULT_STAGE};
use crate::template::{merge_variables, substitute_value, Variables};
use crate::{build_request, HttpRequest, HttpResponse, Transport};

/// One run of a named command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    /// Values supplied through the command's declared flags.
    pub params: Variables,
    pub stage: String,
    pub verbose: bool,
}

impl Invocation {
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            params: Variables::new(),
            stage: DEFAULT_STAGE.to_string(),
            verbose: false,
        }
    }
}

/// The request to send plus the extraction path, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub request: HttpRequest,
    pub value_path: Option<String>,
}

/// What a successful invocation prints.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// No extraction path was declared.
    Full(Value),
    /// The first value matched by `path`.
    Extracted { path: String, value: Value },
}

impl Outcome {
    #[must_use]
    pub fn render(&self, verbose: bool) -> String {
        match self {
            Outcome::Full(body) => {
                let text = pretty(body);
                if verbose {
                    format!(
                        "--- FULL RESPONSE ---\nNo JSONPath specified, returning entire response\n{text}"
                    )
                } else {
                    text
                }
            }
            Outcome::Extracted { path, value } => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Array(_) | Value::Object(_) => pretty(value),
                    Value::Null | Value::Bool(_) | Value::Number(_) => value.to_string(),
                };
                if verbose {
                    format!("--- EXTRACTED VALUE ---\nJSONPath: {path}\nValue: {text}")
                } else {
                    text
                }
            }
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Resolve everything up to (not including) the HTTP call.
pub fn resolve_command(
    file: &ReqFile,
    invocation: &Invocation,
    env: &Variables,
) -> Result<ResolvedCommand> {
    let definition = file.command(&invocation.command)?;
    if !definition.has_url() {
        return Err(Error::MissingRequiredField {
            command: definition.name.clone(),
            field: "url".to_string(),
        });
    }

    let stage_vars = file.stage_variables(&invocation.stage);
    if invocation.verbose && !stage_vars.is_empty() {
        let sorted: BTreeMap<_, _> = stage_vars.iter().collect();
        eprintln!(
            "Using stage '{}' variables: {}",
            invocation.stage,
            serde_json::to_string_pretty(&sorted).unwrap_or_default()
        );
    }

    let vars = merge_variables(env, &invocation.params, &stage_vars);
    let resolved = substitute_value(&definition.raw, &vars);
    let request = build_request(&definition.name, &resolved)?;
    let value_path = resolved
        .get("value")
        .map(value_to_var_string)
        .filter(|p| !p.is_empty());
    log::debug!(
        "resolved command '{}' to {} {}",
        definition.name,
        request.method,
        request.url
    );

    Ok(ResolvedCommand {
        request,
        value_path,
    })
}

/// Resolve, send and reduce the response of one command.
pub fn execute_command(
    file: &ReqFile,
    invocation: &Invocation,
    env: &Variables,
    transport: &dyn Transport,
) -> Result<Outcome> {
    let ResolvedCommand {
        request,
        value_path,
    } = resolve_command(file, invocation, env)?;
    let verbose = invocation.verbose;

    if verbose {
        trace_request(&request);
    }
    let started = Instant::now();
    let response = transport.send(&request)?;
    if verbose {
        trace_response(&response, started.elapsed().as_millis());
    }

    if !response.is_success() {
        return Err(Error::HttpStatus {
            status: response.status,
            body: response.body_text,
        });
    }

    let body = response.json()?;
    if verbose {
        eprintln!("<- Body: {}\n", pretty(&body));
    }

    let Some(path) = value_path else {
        return Ok(Outcome::Full(body));
    };
    match extract(&body, &path) {
        Some(value) => Ok(Outcome::Extracted {
            value: value.clone(),
            path,
        }),
        None => {
            if verbose {
                eprintln!("Response data: {}", pretty(&body));
            }
            Err(Error::ExtractionNotFound(path))
        }
    }
}

fn trace_request(request: &HttpRequest) {
    eprintln!("-> {} {}", request.method, request.url);
    if !request.headers.is_empty() {
        eprintln!("-> Headers:");
        for (k, v) in &request.headers {
            eprintln!("   {k}: {v}");
        }
    }
    if let Some(b) = &request.body {
        eprintln!("-> Body: {b}");
    }
}

fn trace_response(response: &HttpResponse, elapsed_ms: u128) {
    eprintln!(
        "<- {} {} ({} ms)",
        response.status, response.reason, elapsed_ms
    );
    if !response.headers.is_empty() {
        eprintln!("<- Headers:");
        for (k, v) in &response.headers {
            eprintln!("   {k}: {v}");
        }
    }
}

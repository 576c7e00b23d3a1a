//! Translate Command
//!
//! Usage:
//!   transroute translate "Hello" --to fr [--from en] [--format html] [--refine]
//!   echo "Hello" | transroute translate --to ja -f json

use std::io::Read;

use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, is_json};
use crate::types::{BrokerError, OutputFormat, ProviderKind, Result, TranslationRequest};

pub struct TranslateOptions {
    /// Read from stdin when absent
    pub text: Option<String>,
    pub from: Option<String>,
    pub to: String,
    pub format: OutputFormat,
    pub refine: bool,
    pub model: Option<String>,
    pub prefer: Option<ProviderKind>,
    pub output: String,
}

impl TranslateOptions {
    fn into_request(self, text: String) -> TranslationRequest {
        let mut request = TranslationRequest::new(text, self.to)
            .with_format(self.format)
            .with_refinement(self.refine);
        if let Some(from) = self.from {
            request = request.from_lang(from);
        }
        if let Some(model) = self.model {
            request = request.with_refinement_model(model);
        }
        if let Some(provider) = self.prefer {
            request = request.prefer(provider);
        }
        request
    }
}

/// Returns whether the translation succeeded
pub async fn run(options: TranslateOptions) -> Result<bool> {
    let text = match options.text.clone() {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(BrokerError::Io)?;
            buf
        }
    };

    let json_output = is_json(&options.output);
    let ctx = CommandContext::load()?;
    let request = options.into_request(text);
    let response = ctx.orchestrator.translate(&request).await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(response.success);
    }

    let output = Output::new();
    match (&response.data, &response.error) {
        (Some(data), _) => {
            println!("{}", data.text);
            let mut detail = format!(
                "{} · {} chars · {} ms",
                data.provider, data.char_count, data.processing_time_ms
            );
            if data.is_refined {
                detail.push_str(" · refined");
            }
            eprintln!("{}", console::style(detail).dim());
        }
        (None, error) => {
            output.error(error.as_deref().unwrap_or("translation failed"));
        }
    }

    Ok(response.success)
}

//! Instruction templates for the analysis capabilities.
//!
//! Templates are plain markdown files. The placeholders below are replaced
//! literally, so any other braces in a template are left alone.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

use crate::capability::AnalysisRequest;

pub const USER_TEXT: &str = "{user_text_goes_here}";
pub const TOPIC: &str = "{topic_goes_here}";
pub const MOTIVATIONAL_TEXTS: &str = "{motivational_texts_go_here}";

pub const LINGUISTICS_FILE: &str = "linguistics.md";
pub const ARGUMENTATIVE_FILE: &str = "argumentative.md";

/// Prompt sent with the image for text extraction.
pub const EXTRACTION_PROMPT: &str = "Extract the text from this image. \
Transcribe it exactly as written, preserving paragraphs. \
Respond with the transcription only.";

const DEFAULT_LINGUISTICS: &str = "You are an experienced essay examiner.

Analyse the language of the essay below: grammar, spelling, punctuation, \
word choice, cohesion and register. Quote each problem you find, explain it \
and suggest a correction. Finish with an overall assessment of the writer's \
command of the written language.

Essay:
{user_text_goes_here}
";

const DEFAULT_ARGUMENTATIVE: &str = "You are an experienced essay examiner.

Topic: {topic_goes_here}

Supporting texts given to the writer:
{motivational_texts_go_here}

Analyse how the essay below develops an argument about the topic: the \
thesis, the quality and relevance of the supporting arguments, the use of \
the supporting texts, coherence between paragraphs and the conclusion. \
Point out where the essay drifts from the topic.

Essay:
{user_text_goes_here}
";

/// Load the instruction `file_name` from `dir`, falling back to the built-in
/// template when the file (or the directory) does not exist.
pub fn load_instruction(dir: Option<&Path>, file_name: &str) -> Result<String> {
    if let Some(dir) = dir {
        let path = dir.join(file_name);
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "loaded instruction");
                return Ok(contents);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read instruction {}", path.display()));
            }
        }
    }
    Ok(builtin(file_name).to_string())
}

fn builtin(file_name: &str) -> &'static str {
    match file_name {
        ARGUMENTATIVE_FILE => DEFAULT_ARGUMENTATIVE,
        _ => DEFAULT_LINGUISTICS,
    }
}

/// Fill a template's placeholders from the request.
///
/// The template is scanned once. Substituted values are copied as they
/// are, so placeholders inside the essay, topic or supporting texts stay
/// literal.
pub fn render(template: &str, request: &AnalysisRequest) -> String {
    let values = [
        (USER_TEXT, request.text.as_str()),
        (TOPIC, request.topic.as_str()),
        (
            MOTIVATIONAL_TEXTS,
            request.auxiliary_context.as_deref().unwrap_or(""),
        ),
    ];

    let mut out = String::with_capacity(template.len() + request.text.len());
    let mut rest = template;
    loop {
        let next = values
            .iter()
            .filter_map(|&(placeholder, value)| {
                rest.find(placeholder).map(|at| (at, placeholder, value))
            })
            .min_by_key(|&(at, _, _)| at);
        let Some((at, placeholder, value)) = next else {
            break;
        };
        out.push_str(&rest[..at]);
        out.push_str(value);
        rest = &rest[at + placeholder.len()..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            text: "the essay".to_string(),
            topic: "climate".to_string(),
            auxiliary_context: Some("text one".to_string()),
        }
    }

    #[test]
    fn render_replaces_all_placeholders() {
        let out = render(DEFAULT_ARGUMENTATIVE, &request());
        assert!(out.contains("Topic: climate"));
        assert!(out.contains("text one"));
        assert!(out.contains("the essay"));
        assert!(!out.contains(USER_TEXT));
        assert!(!out.contains(TOPIC));
        assert!(!out.contains(MOTIVATIONAL_TEXTS));
    }

    #[test]
    fn render_missing_context_becomes_empty() {
        let mut req = request();
        req.auxiliary_context = None;
        assert_eq!(render("[{motivational_texts_go_here}]", &req), "[]");
    }

    #[test]
    fn render_leaves_other_braces() {
        assert_eq!(render("{json} {user_text_goes_here}", &request()), "{json} the essay");
    }

    #[test]
    fn render_does_not_expand_placeholders_inside_user_text() {
        let mut req = request();
        req.text = "I wrote {topic_goes_here}".to_string();
        assert_eq!(render(USER_TEXT, &req), "I wrote {topic_goes_here}");
    }

    #[test]
    fn render_does_not_expand_placeholders_inside_topic_or_context() {
        let req = AnalysisRequest {
            text: "ESSAY".to_string(),
            topic: "about {user_text_goes_here}".to_string(),
            auxiliary_context: Some("ctx {user_text_goes_here}".to_string()),
        };
        assert_eq!(
            render("T={topic_goes_here} M={motivational_texts_go_here}", &req),
            "T=about {user_text_goes_here} M=ctx {user_text_goes_here}"
        );
        assert_eq!(
            render("{topic_goes_here}|{user_text_goes_here}", &req),
            "about {user_text_goes_here}|ESSAY"
        );
    }

    #[test]
    fn render_fills_repeated_placeholders() {
        let req = request();
        let twice = format!("{TOPIC}/{TOPIC}");
        assert_eq!(render(&twice, &req), format!("{0}/{0}", req.topic));
    }

    #[test]
    fn load_falls_back_to_builtin() {
        let linguistics = load_instruction(None, LINGUISTICS_FILE).unwrap();
        assert!(linguistics.contains(USER_TEXT));

        let dir = tempfile::tempdir().unwrap();
        let argumentative = load_instruction(Some(dir.path()), ARGUMENTATIVE_FILE).unwrap();
        assert!(argumentative.contains(TOPIC));
    }

    #[test]
    fn load_prefers_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LINGUISTICS_FILE), "custom {user_text_goes_here}").unwrap();
        let loaded = load_instruction(Some(dir.path()), LINGUISTICS_FILE).unwrap();
        assert_eq!(loaded, "custom {user_text_goes_here}");
    }
}

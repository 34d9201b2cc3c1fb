//! Prompt templates and response parsing per analysis intent.
//!
//! Map prompts carry one chunk as `Document Text:`; reduce prompts merge
//! the partial answers of a multi-chunk document. Intents whose output is
//! structured (entities, comparison items) ask for a JSON array and are
//! merged locally instead of through a reduce call.

use serde::Deserialize;

use crate::error::ModelError;
use crate::models::AnalysisIntent;

const SUMMARIZE: &str = "Provide a concise professional summary of this document. \
Identify the document type and key information. \
If this is a resume, highlight education, experience, skills, and qualifications.";

const ENTITIES: &str = "Extract named entities from the given text. \
Categorize them as PERSON, ORGANIZATION (ORG), GEOGRAPHICAL LOCATION (GEO), and DATE. \
For a resume, be sure to include the candidate name, companies, institutions, locations, and dates. \
Return results ONLY in valid JSON format as an array of objects with 'entity' and 'type' properties:\n\
[{\"entity\": \"Elon Musk\", \"type\": \"PERSON\"}, {\"entity\": \"OpenAI\", \"type\": \"ORG\"}]";

const KEY_ELEMENTS: &str = "Extract key themes, topics, and concepts from this document. \
If this is a resume, include skills, qualifications, education level, experience overview, and career highlights. \
Organize the information in a clear, structured format with appropriate headings.";

const SKILLS: &str = "Extract and categorize all professional skills mentioned in this resume. \
Group them into categories such as Technical Skills, Soft Skills, Tools & Software, Languages, etc. \
For each skill, provide a confidence level (High/Medium/Low) based on how clearly it's demonstrated in the resume.";

const EXPERIENCE: &str = "Analyze the work experience section of this resume. \
Extract and summarize each position, including company name, job title, duration, and key responsibilities. \
Calculate the total years of experience and identify the primary industry sectors.";

const COMPARE_ITEMS: &str = "List the skills, requirements, qualifications, and keywords stated in this document. \
If this is a resume, list what the candidate offers; if it is a job description, list what the role requires. \
Use short noun phrases. \
Return results ONLY in valid JSON format as an array of strings:\n\
[\"Python\", \"Project management\", \"Bachelor's degree\"]";

const STRICT_JSON: &str = "Your previous reply could not be parsed. \
Respond with ONLY the JSON array. Do not add prose, explanations, or code fences.";

const STRICT_TEXT: &str = "Your previous reply was empty or unusable. \
Respond with the requested analysis as plain text.";

/// The instruction for an intent, as a user would phrase it.
pub fn instruction(intent: AnalysisIntent, question: Option<&str>) -> String {
    match intent {
        AnalysisIntent::Summarize => SUMMARIZE.to_string(),
        AnalysisIntent::ExtractEntities => ENTITIES.to_string(),
        AnalysisIntent::KeyElements => KEY_ELEMENTS.to_string(),
        AnalysisIntent::Skills => SKILLS.to_string(),
        AnalysisIntent::Experience => EXPERIENCE.to_string(),
        AnalysisIntent::Compare => COMPARE_ITEMS.to_string(),
        AnalysisIntent::Qa => format!(
            "Based on the document provided, answer this question: {}",
            question.unwrap_or_default()
        ),
    }
}

/// Whether the intent's map output is a JSON array merged locally.
pub fn is_structured(intent: AnalysisIntent) -> bool {
    matches!(
        intent,
        AnalysisIntent::ExtractEntities | AnalysisIntent::Compare
    )
}

/// Prompt for one chunk. `part` is `(index, total)` when the document was split.
pub fn map_prompt(
    intent: AnalysisIntent,
    question: Option<&str>,
    text: &str,
    part: Option<(usize, usize)>,
    strict: bool,
) -> String {
    let mut prompt = instruction(intent, question);
    if let Some((index, total)) = part {
        prompt.push_str(&format!(
            "\n\nNote: this is part {} of {} of the document. Only use the text below.",
            index + 1,
            total
        ));
    }
    if strict {
        prompt.push_str("\n\n");
        prompt.push_str(strict_suffix(intent));
    }
    prompt.push_str("\n\nDocument Text:\n");
    prompt.push_str(text);
    prompt
}

/// Prompt merging partial answers into one.
pub fn reduce_prompt(
    intent: AnalysisIntent,
    question: Option<&str>,
    partials: &[&str],
    strict: bool,
) -> String {
    let mut prompt = format!(
        "The document was analyzed in {} parts. \
Combine the partial analyses below into a single response to the original request. \
Remove duplicates and keep every distinct fact.\n\nOriginal request: {}",
        partials.len(),
        instruction(intent, question)
    );
    if strict {
        prompt.push_str("\n\n");
        prompt.push_str(STRICT_TEXT);
    }
    prompt.push_str("\n\nPartial analyses:");
    for (i, partial) in partials.iter().enumerate() {
        prompt.push_str(&format!("\n\n--- Part {} ---\n{}", i + 1, partial));
    }
    prompt
}

/// Characters a map prompt adds around its chunk, for any part number.
pub fn map_overhead(intent: AnalysisIntent, question: Option<&str>) -> usize {
    map_prompt(intent, question, "", Some((usize::MAX - 1, usize::MAX)), true)
        .chars()
        .count()
}

/// Characters a reduce prompt adds around its partials.
pub fn reduce_overhead(intent: AnalysisIntent, question: Option<&str>, parts: usize) -> usize {
    reduce_prompt(intent, question, &vec![""; parts], true).chars().count()
}

fn strict_suffix(intent: AnalysisIntent) -> &'static str {
    if is_structured(intent) {
        STRICT_JSON
    } else {
        STRICT_TEXT
    }
}

/// An entity as the model reported it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawEntity {
    pub entity: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// Slice out the outermost `[...]` of a reply and parse it.
fn json_array<T: for<'de> Deserialize<'de>>(response: &str) -> Result<Vec<T>, ModelError> {
    let start = response.find('[');
    let end = response.rfind(']');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &response[s..=e],
        _ => {
            return Err(ModelError::InvalidResponse(
                "no JSON array in response".to_string(),
            ))
        }
    };
    serde_json::from_str(json).map_err(|e| ModelError::InvalidResponse(e.to_string()))
}

pub fn parse_entities(response: &str) -> Result<Vec<RawEntity>, ModelError> {
    json_array(response)
}

pub fn parse_items(response: &str) -> Result<Vec<String>, ModelError> {
    json_array(response)
}

/// Plain-text replies only need to be non-empty.
pub fn parse_text(response: &str) -> Result<String, ModelError> {
    let text = response.trim();
    if text.is_empty() {
        return Err(ModelError::InvalidResponse("empty reply".to_string()));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_prompt_places_text_last() {
        let p = map_prompt(AnalysisIntent::Summarize, None, "BODY", None, false);
        assert!(p.starts_with("Provide a concise professional summary"));
        assert!(p.ends_with("Document Text:\nBODY"));
        assert!(!p.contains("part"));
    }

    #[test]
    fn map_prompt_marks_parts_and_strictness() {
        let p = map_prompt(AnalysisIntent::ExtractEntities, None, "x", Some((1, 3)), true);
        assert!(p.contains("part 2 of 3"));
        assert!(p.contains("ONLY the JSON array"));
    }

    #[test]
    fn qa_prompt_includes_question() {
        let p = map_prompt(AnalysisIntent::Qa, Some("Where?"), "x", None, false);
        assert!(p.contains("answer this question: Where?"));
    }

    #[test]
    fn reduce_prompt_lists_parts() {
        let p = reduce_prompt(AnalysisIntent::Skills, None, &["a", "b"], false);
        assert!(p.contains("analyzed in 2 parts"));
        assert!(p.contains("--- Part 1 ---\na"));
        assert!(p.contains("--- Part 2 ---\nb"));
    }

    #[test]
    fn entities_parsed_from_surrounding_prose() {
        let reply = "Sure! Here you go:\n```json\n[{\"entity\": \"Ada Lovelace\", \"type\": \"PERSON\"}]\n```";
        let entities = parse_entities(reply).unwrap();
        assert_eq!(
            entities,
            vec![RawEntity {
                entity: "Ada Lovelace".into(),
                entity_type: "PERSON".into()
            }]
        );
    }

    #[test]
    fn missing_array_is_invalid_response() {
        assert!(matches!(
            parse_entities("I could not find any entities."),
            Err(ModelError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_items("] backwards ["),
            Err(ModelError::InvalidResponse(_))
        ));
    }

    #[test]
    fn items_parse_as_strings() {
        assert_eq!(
            parse_items("[\"Rust\", \"SQL\"]").unwrap(),
            vec!["Rust".to_string(), "SQL".to_string()]
        );
    }

    #[test]
    fn empty_text_reply_rejected() {
        assert!(parse_text("   ").is_err());
        assert_eq!(parse_text(" ok ").unwrap(), "ok");
    }
}

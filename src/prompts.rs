//! Prompts sent to the inference backend.
//!
//! Every prompt lives here so the stage modules only deal with transport,
//! parsing and validation. Language names are parameters; nothing below
//! assumes a particular source or target language.

use crate::config::Language;

/// User instruction sent with every page image.
pub fn ocr_instruction(source: &Language) -> String {
    format!(
        "Extract all text from this image of a medical report page. \
Do not translate anything (content will be primarily in {}), \
do not output any extra text - only what you see in the image.",
        source.name
    )
}

/// System prompt establishing the data-extraction role.
pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a data extraction assistant. \
Extract patient information and organ descriptions from the provided medical report text. \
Output a single JSON object.";

/// User prompt embedding the report text and the literal JSON shape.
pub fn extraction_prompt(text: &str, source: &Language) -> String {
    format!(
        r#"
Please extract the patient information (patient_group, patient_id, age, gender) and the descriptions for each organ from the following {lang} medical report text.

The output must be a single, well-formed JSON object with this structure:
{{
  "patient_group": "...",
  "patient_id": "...",
  "age": "...",
  "gender": "...",
  "captions": {{
    "organ_name_1": "description in {lang}...",
    "organ_name_2": "description in {lang}...",
    ...
    "conclusion": "conclusion extracted from the text"
  }}
}}

Report Text:
---
{text}
---
"#,
        lang = source.name,
        text = text
    )
}

/// System prompt for the translation stage.
pub fn translation_system_prompt(source: &Language, target: &Language) -> String {
    format!(
        "You are an expert medical translator. Translate the provided JSON values from {} to {}. \
Preserve the JSON structure and keys. Do not add any commentary.",
        source.name, target.name
    )
}

/// User prompt embedding the captions (already serialised as JSON).
pub fn translation_prompt(captions_json: &str, target: &Language) -> String {
    format!(
        "\nTranslate the values in the following JSON object to {}.\n\
Return a single JSON object with the same keys.\n\nInput:\n{}\n",
        target.name, captions_json
    )
}

/// Follow-up turn sent after an answer that failed to parse.
pub fn corrective_prompt(problem: &str) -> String {
    format!(
        "Your previous answer could not be used: {problem}.\n\
Reply again with ONLY the corrected JSON object, no markdown fences and no commentary."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_instruction_forbids_translation() {
        let p = ocr_instruction(&Language::new("Russian", "ru"));
        assert!(p.contains("Do not translate"));
        assert!(p.contains("Russian"));
    }

    #[test]
    fn extraction_prompt_embeds_text_and_shape() {
        let p = extraction_prompt("ПЕЧЕНЬ: норма", &Language::new("Russian", "ru"));
        assert!(p.contains("ПЕЧЕНЬ: норма"));
        assert!(p.contains("\"captions\""));
        assert!(p.contains("\"conclusion\""));
        assert!(p.contains("\"patient_id\""));
    }

    #[test]
    fn translation_prompts_name_both_languages() {
        let src = Language::new("Russian", "ru");
        let dst = Language::new("Kazakh", "kz");
        let sys = translation_system_prompt(&src, &dst);
        assert!(sys.contains("from Russian to Kazakh"));
        let user = translation_prompt("{\"liver\": \"норма\"}", &dst);
        assert!(user.contains("{\"liver\": \"норма\"}"));
        assert!(user.contains("same keys"));
    }
}

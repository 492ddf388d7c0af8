//! Single-pass record extraction from page text.

use tracing::{debug, instrument};

use eventharvest_shared::{ExtractedRecord, Field};
use eventharvest_text::truncate_chars;

use crate::llm::PromptRunner;

/// Render `fields` as a pretty JSON object of empty-string placeholders,
/// keeping schema order.
pub fn schema_template(fields: &[Field]) -> String {
    if fields.is_empty() {
        return "{}".into();
    }
    let lines: Vec<String> = fields
        .iter()
        .map(|f| format!("  \"{}\": \"\"", f.as_str()))
        .collect();
    format!("{{\n{}\n}}", lines.join(",\n"))
}

/// Keep only the keys of `record` that belong to `schema`.
pub(crate) fn restrict_to(record: ExtractedRecord, schema: &[Field]) -> ExtractedRecord {
    let mut restricted = ExtractedRecord::new();
    for (field, value) in record.populated() {
        if schema.contains(&field) {
            restricted.set(field, value);
        }
    }
    restricted
}

/// Prompts the model once per page to fill the whole schema.
pub struct RecordExtractor<'a> {
    runner: PromptRunner<'a>,
    content_chars: usize,
}

impl<'a> RecordExtractor<'a> {
    pub fn new(runner: PromptRunner<'a>, content_chars: usize) -> Self {
        Self {
            runner,
            content_chars,
        }
    }

    pub fn build_prompt(&self, content: &str, schema: &[Field], url: &str) -> String {
        let snippet = truncate_chars(content, self.content_chars);
        format!(
            "Extract structured event and organizer details from this webpage content snippet.\n\
             If a field is unknown, return an empty string \"\".\n\
             Return ONLY valid JSON.\n\
             \n\
             Required fields:\n\
             {}\n\
             \n\
             Source URL: {url}\n\
             \n\
             CONTENT:\n\
             {snippet}\n",
            schema_template(schema)
        )
    }

    /// Extract a partial record from visible page text. Failures yield an
    /// empty record.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn extract(&self, content: &str, schema: &[Field], url: &str) -> ExtractedRecord {
        let prompt = self.build_prompt(content, schema, url);
        let decoded = self.runner.json("extract", &prompt).await;
        let record = restrict_to(ExtractedRecord::from_json(&decoded), schema);
        debug!(
            populated = record.populated().count(),
            "single-pass extraction done"
        );
        record
    }
}

//! Header emission: the `missing/process/format/fields`
//! preamble sent at the start of each capture session unless `NO_HEADER`
//! was negotiated, in either the plain-text or `XML` shape.

use crate::convert::sample_bytes;
use crate::convert::Process;
use crate::plan::CapturePlan;
use crate::plan::FieldCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ascii,
    Framed,
    Unframed,
    Base64,
}

impl Format {
    pub fn label(&self) -> &'static str {
        match self {
            Format::Ascii => "ASCII",
            Format::Framed => "FRAMED",
            Format::Unframed => "UNFRAMED",
            Format::Base64 => "BASE64",
        }
    }
}

fn capture_string(field: &crate::plan::PlanField) -> String {
    field.capture.name().to_string()
}

/// Plain-text header: `missing: <n>`, `process: ...`, `format: ...`,
/// `sample-bytes: <k>` (non-ASCII only), then one `fields:` line per
/// captured field.
pub fn plain_text(plan: &CapturePlan, process: Process, format: Format, missed: u64) -> String {
    let mut out = String::new();
    out.push_str(&format!("missed: {missed}\n"));
    out.push_str(&format!("process: {}\n", process.label()));
    out.push_str(&format!("format: {}\n", format.label()));
    if format != Format::Ascii {
        out.push_str(&format!("sample-bytes: {}\n", sample_bytes(plan, process)));
    }
    out.push_str("fields:\n");
    for field in &plan.fields {
        out.push_str(&format!("  {} {}", field.capture_label(), capture_string(field)));
        if let Some((scale, offset, units)) = &field.scaling {
            if field.category != FieldCategory::Unscaled32 {
                out.push_str(&format!(" Scaled: {scale} {offset} Units: {units}"));
            }
        }
        out.push('\n');
    }
    out
}

/// XML header form: the same attributes wrapped in
/// `<header><data .../><fields><field .../></fields></header>`.
pub fn xml(plan: &CapturePlan, process: Process, format: Format, missed: u64) -> String {
    let mut out = String::new();
    out.push_str("<header>\n");
    out.push_str(&format!(
        "<data process=\"{}\" format=\"{}\" missed=\"{missed}\"",
        process.label(),
        format.label()
    ));
    if format != Format::Ascii {
        out.push_str(&format!(" sample_bytes=\"{}\"", sample_bytes(plan, process)));
    }
    out.push_str("/>\n<fields>\n");
    for field in &plan.fields {
        out.push_str(&format!(
            "<field name=\"{}\" capture=\"{}\"",
            xml_escape(&field.capture_label()),
            xml_escape(capture_string(field).as_str())
        ));
        if let Some((scale, offset, units)) = &field.scaling {
            if field.category != FieldCategory::Unscaled32 {
                out.push_str(&format!(" scale=\"{scale}\" offset=\"{offset}\" units=\"{}\"", xml_escape(units)));
            }
        }
        out.push_str("/>\n");
    }
    out.push_str("</fields>\n</header>\n");
    out
}

/// Escapes the five XML special characters (`&`, `<`, `>`, `"`, `'`).
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanField;
    use panda_entity::CaptureOption;

    fn sample_plan() -> CapturePlan {
        CapturePlan {
            fields: vec![PlanField {
                block: "INENC".to_string(),
                instance: 0,
                field: "VAL".to_string(),
                capture: CaptureOption::Value,
                category: FieldCategory::Scaled32,
                offset: 0,
                scaling: Some((0.001, 0.0, "mm".to_string())),
                bit_slot: None,
            }],
            include_timestamp: false,
            include_sample_count: false,
            bit_group_words: 0,
            sample_bytes: 4,
        }
    }

    #[test]
    fn plain_text_includes_scaled_line() {
        let text = plain_text(&sample_plan(), Process::Scaled, Format::Framed, 0);
        assert!(text.contains("INENC1.VAL Value Scaled: 0.001 0 Units: mm"));
        assert!(text.contains("sample-bytes: 8"));
    }

    #[test]
    fn xml_escapes_field_names() {
        let mut plan = sample_plan();
        plan.fields[0].field = "A&B".to_string();
        let text = xml(&plan, Process::Scaled, Format::Framed, 0);
        assert!(text.contains("A&amp;B"));
    }
}

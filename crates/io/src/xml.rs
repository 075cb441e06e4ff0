// OPGEE model input XML
//
// Layout mirrors the model's own field files: one <Analysis>, then one
// <Field modifies="template"> per parameter set. Audit notes are XML comments
// so the model ignores them. Output is a pure function of the input (and of
// the existing document, when merging).

use quick_xml::escape::unescape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use wellset_recon::model::{AuditEntry, ConfigEntry, FieldBlock};
use wellset_recon::EmissionsConfig;

const INDENT: usize = 4;

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', INDENT),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), String> {
        self.writer.write_event(event).map_err(|e| e.to_string())
    }

    fn start(&mut self, tag: BytesStart<'_>) -> Result<(), String> {
        self.event(Event::Start(tag))
    }

    fn end(&mut self, name: &str) -> Result<(), String> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    /// `<tag attr="..">text</tag>` on one line.
    fn text_element(&mut self, tag: BytesStart<'_>, text: &str) -> Result<(), String> {
        let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
        self.start(tag)?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(&name)
    }

    fn attribute(&mut self, name: &str, value: &str) -> Result<(), String> {
        let mut tag = BytesStart::new("A");
        tag.push_attribute(("name", name));
        self.text_element(tag, value)
    }

    fn group_all(&mut self) -> Result<(), String> {
        self.text_element(BytesStart::new("Group"), "all")
    }

    fn comment(&mut self, text: &str) -> Result<(), String> {
        // "--" may not appear inside a comment
        let mut safe = text.replace("--", "- -");
        if safe.ends_with('-') {
            safe.push(' ');
        }
        self.event(Event::Comment(BytesText::from_escaped(format!(" {safe} "))))
    }

    fn finish(self) -> Vec<u8> {
        let mut bytes = self.writer.into_inner();
        bytes.push(b'\n');
        bytes
    }
}

fn audit_line(entry: &AuditEntry) -> String {
    let flags: Vec<String> = entry.flags.iter().map(|f| f.to_string()).collect();
    format!("audit {}/{}: {}", entry.group, entry.path, flags.join("; "))
}

fn write_field(out: &mut XmlOut, field: &FieldBlock) -> Result<(), String> {
    let mut tag = BytesStart::new("Field");
    tag.push_attribute(("name", field.name.as_str()));
    tag.push_attribute(("modifies", "template"));
    out.start(tag)?;
    out.group_all()?;

    for entry in &field.entries {
        match &entry.process {
            None => out.attribute(&entry.path, &entry.value.value.to_string())?,
            Some(class) => write_process_entry(out, class, entry)?,
        }
    }
    out.end("Field")
}

fn write_process_entry(out: &mut XmlOut, class: &str, entry: &ConfigEntry) -> Result<(), String> {
    let mut disabled = BytesStart::new("Process");
    disabled.push_attribute(("class", class));
    disabled.push_attribute(("enabled", "false"));
    out.event(Event::Empty(disabled))?;

    let mut tag = BytesStart::new("Process");
    tag.push_attribute(("class", class));
    out.start(tag)?;
    out.attribute(&entry.path, &entry.value.value.to_string())?;
    out.end("Process")
}

fn write_analysis(out: &mut XmlOut, config: &EmissionsConfig) -> Result<(), String> {
    let mut analysis = BytesStart::new("Analysis");
    analysis.push_attribute(("name", config.analysis.name.as_str()));
    out.start(analysis)?;
    out.group_all()?;
    for (name, value) in &config.analysis.attributes {
        out.attribute(name, value)?;
    }
    out.end("Analysis")
}

fn write_audit(out: &mut XmlOut, config: &EmissionsConfig) -> Result<(), String> {
    for entry in &config.audit {
        out.comment(&audit_line(entry))?;
    }
    Ok(())
}

fn write_fields(out: &mut XmlOut, config: &EmissionsConfig) -> Result<(), String> {
    for field in &config.fields {
        write_field(out, field)?;
    }
    Ok(())
}

/// Render the full model input document.
pub fn render_emissions_config(config: &EmissionsConfig) -> Result<Vec<u8>, String> {
    let mut out = XmlOut::new();
    out.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    out.start(BytesStart::new("Model"))?;
    write_audit(&mut out, config)?;
    write_analysis(&mut out, config)?;
    write_fields(&mut out, config)?;
    out.end("Model")?;
    Ok(out.finish())
}

fn attr_value(tag: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    tag.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| {
            let raw = String::from_utf8_lossy(&a.value).into_owned();
            unescape(&raw).map(|v| v.into_owned()).unwrap_or(raw)
        })
}

/// Model-level elements this tool owns in an existing document.
fn is_generated(tag: &BytesStart<'_>, analysis: &str) -> bool {
    match tag.name().as_ref() {
        b"Field" => attr_value(tag, b"modifies").as_deref() == Some("template"),
        b"Analysis" => attr_value(tag, b"name").as_deref() == Some(analysis),
        _ => false,
    }
}

fn is_audit_comment(text: &BytesText<'_>) -> bool {
    let text = String::from_utf8_lossy(text.as_ref());
    let text = text.trim_start();
    text.starts_with("audit ") && text.contains(':')
}

/// Merge into an existing model document. Everything else in the file is
/// kept; the named `<Analysis>`, every `<Field modifies="template">` and
/// earlier audit comments are replaced by the current run's.
pub fn merge_emissions_config(existing: &str, config: &EmissionsConfig) -> Result<Vec<u8>, String> {
    let analysis = config.analysis.name.as_str();
    let mut reader = Reader::from_str(existing);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut out = XmlOut::new();
    let mut depth = 0usize; // 1 = directly inside <Model>
    let mut skipping = 0usize;
    let mut saw_model = false;
    let mut wrote_analysis = false;

    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| format!("existing model file at byte {}: {e}", reader.buffer_position()))?;

        if skipping > 0 {
            match event {
                Event::Start(_) => skipping += 1,
                Event::End(_) => skipping -= 1,
                Event::Eof => return Err("existing model file ends inside an element".into()),
                _ => {}
            }
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(ref e) if depth == 0 && e.name().as_ref() == b"Model" => {
                saw_model = true;
                depth = 1;
                out.event(event.borrow())?;
                write_audit(&mut out, config)?;
            }
            Event::Empty(ref e) if depth == 0 && e.name().as_ref() == b"Model" => {
                saw_model = true;
                out.start(e.borrow())?;
                write_audit(&mut out, config)?;
                write_analysis(&mut out, config)?;
                write_fields(&mut out, config)?;
                out.end("Model")?;
            }
            Event::End(ref e) if depth == 1 && e.name().as_ref() == b"Model" => {
                if !wrote_analysis {
                    write_analysis(&mut out, config)?;
                }
                write_fields(&mut out, config)?;
                out.event(event.borrow())?;
                depth = 0;
            }
            Event::Start(ref e) | Event::Empty(ref e) if depth == 1 && is_generated(e, analysis) => {
                if matches!(event, Event::Start(_)) {
                    skipping = 1;
                }
                if e.name().as_ref() == b"Analysis" && !wrote_analysis {
                    write_analysis(&mut out, config)?;
                    wrote_analysis = true;
                }
            }
            Event::Comment(ref c) if depth == 1 && is_audit_comment(c) => {}
            Event::Start(_) => {
                depth += 1;
                out.event(event.borrow())?;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                out.event(event.borrow())?;
            }
            _ => out.event(event.borrow())?,
        }
    }

    if !saw_model {
        return Err("existing model file has no <Model> root element".into());
    }
    Ok(out.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellset_recon::model::{AnalysisBlock, ConfigValue, Flagged};
    use wellset_recon::Flag;

    fn entry(path: &str, process: Option<&str>, value: ConfigValue) -> ConfigEntry {
        ConfigEntry {
            path: path.into(),
            process: process.map(String::from),
            is_default: false,
            value: Flagged::clean(value),
        }
    }

    fn config() -> EmissionsConfig {
        EmissionsConfig {
            analysis: AnalysisBlock {
                name: "FUSE_run".into(),
                attributes: vec![
                    ("functional_unit".into(), "oil".into()),
                    ("GWP_horizon".into(), "100".into()),
                ],
            },
            fields: vec![FieldBlock {
                name: "KAYBOB & co".into(),
                entries: vec![
                    entry("country", None, ConfigValue::Text("Canada".into())),
                    entry("GOR", None, ConfigValue::Number(0.00001)),
                    entry("num_prod_wells", None, ConfigValue::Number(2.0)),
                    entry("fraction_diluent", Some("HeavyOilDilution"), ConfigValue::Number(0.0)),
                ],
            }],
            audit: vec![AuditEntry {
                group: "KAYBOB & co".into(),
                path: "GOR".into(),
                flags: vec![
                    Flag::InsufficientData { aggregate: "GOR".into() },
                    Flag::DefaultSubstituted { default: "0".into() },
                ],
            }],
        }
    }

    #[test]
    fn document_layout() {
        let xml = String::from_utf8(render_emissions_config(&config()).unwrap()).unwrap();
        let expected = r#"<?xml version="1.0" encoding="UTF-8"?>
<Model>
    <!-- audit KAYBOB & co/GOR: insufficient data for GOR; default substituted: 0 -->
    <Analysis name="FUSE_run">
        <Group>all</Group>
        <A name="functional_unit">oil</A>
        <A name="GWP_horizon">100</A>
    </Analysis>
    <Field name="KAYBOB &amp; co" modifies="template">
        <Group>all</Group>
        <A name="country">Canada</A>
        <A name="GOR">0.00001</A>
        <A name="num_prod_wells">2</A>
        <Process class="HeavyOilDilution" enabled="false"/>
        <Process class="HeavyOilDilution">
            <A name="fraction_diluent">0</A>
        </Process>
    </Field>
</Model>
"#;
        assert_eq!(xml, expected);
    }

    #[test]
    fn rendering_is_byte_stable() {
        let a = render_emissions_config(&config()).unwrap();
        let b = render_emissions_config(&config()).unwrap();
        assert_eq!(a, b);
        assert_eq!(crate::sha256_hex(&a), crate::sha256_hex(&b));
    }

    #[test]
    fn comment_never_contains_double_hyphen() {
        let mut out = XmlOut::new();
        out.comment("delta --5-").unwrap();
        let text = String::from_utf8(out.finish()).unwrap();
        assert_eq!(text, "<!-- delta - -5-  -->\n");
    }

    const EXISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Model>
  <!-- audit OLD/GOR: default substituted: 0 -->
  <!-- hand-tuned for the 2019 study -->
  <Analysis name="FUSE_run">
    <A name="functional_unit">gas</A>
    <Group>all</Group>
  </Analysis>
  <Analysis name="baseline">
    <A name="functional_unit">oil</A>
  </Analysis>
  <Field name="STALE" modifies="template">
    <Group>all</Group>
    <Process class="HeavyOilDilution">
      <A name="fraction_diluent">0.2</A>
    </Process>
  </Field>
  <Field name="Reference">
    <A name="country">Norway</A>
  </Field>
  <Field name="STALE2" modifies="template"/>
</Model>
"#;

    fn merged() -> String {
        String::from_utf8(merge_emissions_config(EXISTING, &config()).unwrap()).unwrap()
    }

    #[test]
    fn merge_keeps_foreign_elements() {
        let xml = merged();
        assert!(xml.contains("<!-- hand-tuned for the 2019 study -->"));
        assert!(xml.contains("<Analysis name=\"baseline\">"));
        assert!(xml.contains("<Field name=\"Reference\">"));
        assert!(xml.contains("<A name=\"country\">Norway</A>"));
    }

    #[test]
    fn merge_replaces_generated_elements() {
        let xml = merged();
        assert!(!xml.contains("STALE"));
        assert!(!xml.contains("audit OLD/GOR"));
        assert!(!xml.contains("0.2"));
        assert_eq!(xml.matches("<Analysis name=\"FUSE_run\">").count(), 1);
        assert!(xml.contains("<A name=\"functional_unit\">oil</A>"));
        assert!(!xml.contains(">gas<"));
        assert!(xml.contains("<!-- audit KAYBOB & co/GOR:"));
        assert!(xml.contains("<Field name=\"KAYBOB &amp; co\" modifies=\"template\">"));
        // analysis stays where it was, new fields go last
        let analysis = xml.find("name=\"FUSE_run\"").unwrap();
        let baseline = xml.find("name=\"baseline\"").unwrap();
        let reference = xml.find("name=\"Reference\"").unwrap();
        let field = xml.find("KAYBOB &amp; co").unwrap();
        assert!(analysis < baseline && reference < field);
        assert!(xml.ends_with("</Model>\n"));
    }

    #[test]
    fn merge_is_idempotent() {
        let once = merged();
        let twice = merge_emissions_config(&once, &config()).unwrap();
        assert_eq!(once.as_bytes(), twice.as_slice());
    }

    #[test]
    fn merge_into_rendered_document_matches_render() {
        let fresh = render_emissions_config(&config()).unwrap();
        let text = String::from_utf8(fresh.clone()).unwrap();
        assert_eq!(merge_emissions_config(&text, &config()).unwrap(), fresh);
    }

    #[test]
    fn merge_adds_missing_analysis() {
        let xml = merge_emissions_config("<Model><Other/></Model>", &config()).unwrap();
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains("<Other/>"));
        assert!(xml.find("<Other/>").unwrap() < xml.find("<Analysis name=\"FUSE_run\">").unwrap());
    }

    #[test]
    fn merge_rejects_document_without_model() {
        assert!(merge_emissions_config("<Project/>", &config()).is_err());
        assert!(merge_emissions_config("<Model><Field name=\"x\" modifies=\"template\">", &config()).is_err());
    }
}

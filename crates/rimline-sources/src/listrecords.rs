//! OAI-PMH `ListRecords` response parser using quick-xml
//!
//! Element names are matched on their local part so prefixed documents
//! (`oai:record`) parse the same as default-namespace ones.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rimline_core::FetchError;
use rimline_core::ids::normalize_doi;
use rimline_store::Document;
use serde_json::Value;

/// OAI error code meaning "the request was fine, there is just nothing"
const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// One record of a `ListRecords` page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OaiRecord {
    pub identifier: String,
    pub datestamp: Option<String>,
    pub sets: Vec<String>,
    pub deleted: bool,
    /// Inner XML of `<metadata>`, verbatim
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListRecordsPage {
    pub records: Vec<OaiRecord>,
    /// Present while the list is incomplete
    pub resumption_token: Option<String>,
    pub complete_list_size: Option<u64>,
}

fn xml_err(e: quick_xml::Error) -> FetchError {
    FetchError::Parse(format!("OAI-PMH XML: {e}"))
}

fn attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Text content up to the matching end tag, nested markup flattened.
fn element_text(reader: &mut Reader<&[u8]>) -> Result<String, quick_xml::Error> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut depth = 1usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(text.trim().to_string())
}

/// Parse one `ListRecords` response body.
///
/// `noRecordsMatch` yields an empty page; any other OAI error code is a
/// [`FetchError::Protocol`].
pub fn parse_list_records(xml: &str) -> Result<ListRecordsPage, FetchError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListRecordsPage::default();
    let mut errors: Vec<(String, String)> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"error" => {
                    let code = attr(&e, b"code").unwrap_or_default();
                    let message = element_text(&mut reader).map_err(xml_err)?;
                    errors.push((code, message));
                }
                b"record" => page.records.push(parse_record(&mut reader).map_err(xml_err)?),
                b"resumptionToken" => {
                    page.complete_list_size =
                        attr(&e, b"completeListSize").and_then(|s| s.parse().ok());
                    let token = element_text(&mut reader).map_err(xml_err)?;
                    page.resumption_token = Some(token).filter(|t| !t.is_empty());
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                // Empty token marks the last page
                b"resumptionToken" => {
                    page.complete_list_size =
                        attr(&e, b"completeListSize").and_then(|s| s.parse().ok());
                }
                b"error" => errors.push((attr(&e, b"code").unwrap_or_default(), String::new())),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    match errors.iter().find(|(code, _)| code != NO_RECORDS_MATCH) {
        Some((code, message)) => Err(FetchError::Protocol(format!("OAI error {code}: {message}"))),
        None => Ok(page),
    }
}

fn parse_record(reader: &mut Reader<&[u8]>) -> Result<OaiRecord, quick_xml::Error> {
    let mut record = OaiRecord::default();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"header" => {
                    record.deleted = attr(&e, b"status").is_some_and(|s| s == "deleted");
                    parse_header(reader, &mut record)?;
                }
                b"metadata" => {
                    let raw = reader.read_text(e.name())?;
                    record.metadata = Some(raw.trim().to_string());
                }
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"record" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(record)
}

fn parse_header(reader: &mut Reader<&[u8]>, record: &mut OaiRecord) -> Result<(), quick_xml::Error> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"identifier" => record.identifier = element_text(reader)?,
                b"datestamp" => record.datestamp = Some(element_text(reader)?),
                b"setSpec" => record.sets.push(element_text(reader)?),
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"header" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// Fields [`extract_fields`] can produce.
pub const EXTRACTED_FIELDS: &[&str] = &["doi", "title", "date", "creators"];

/// Pull the few fields the matchers inspect out of Dublin Core style
/// metadata: first title, creators, first date, and the first identifier
/// that is a DOI. Malformed metadata yields whatever was read before the error.
pub fn extract_fields(metadata: &str) -> Document {
    let mut reader = Reader::from_str(metadata);
    reader.config_mut().trim_text(true);

    let mut doc = Document::new();
    let mut creators = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(ev) => ev,
            Err(e) => {
                log::debug!("metadata parse stopped: {e}");
                break;
            }
        };
        let field = match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"title" => Some("title"),
                b"creator" => Some("creator"),
                b"date" => Some("date"),
                b"identifier" => Some("identifier"),
                _ => None,
            },
            Event::Eof => break,
            _ => None,
        };
        buf.clear();

        let Some(field) = field else {
            continue;
        };
        let Ok(text) = element_text(&mut reader) else {
            break;
        };
        match field {
            "creator" => creators.push(Value::String(text)),
            "identifier" => {
                if !doc.contains_key("doi") {
                    if let Ok(doi) = normalize_doi(&text) {
                        doc.insert("doi".into(), Value::String(doi));
                    }
                }
            }
            other => {
                if !doc.contains_key(other) {
                    doc.insert(other.into(), Value::String(text));
                }
            }
        }
    }

    if !creators.is_empty() {
        doc.insert("creators".into(), Value::Array(creators));
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-05-01T10:00:00Z</responseDate>
  <request verb="ListRecords" metadataPrefix="oai_dc">https://repo.example.org/oai</request>
  <ListRecords>
    <record>
      <header>
        <identifier>oai:repo.example.org:101</identifier>
        <datestamp>2024-04-30</datestamp>
        <setSpec>publications</setSpec>
        <setSpec>theses</setSpec>
      </header>
      <metadata>
        <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">
          <dc:title>Soil &amp; Water</dc:title>
          <dc:creator>Vries, Jan de</dc:creator>
          <dc:creator>Bakker, Pieter</dc:creator>
          <dc:identifier>https://repo.example.org/101</dc:identifier>
          <dc:identifier>doi:10.1234/SOIL.5</dc:identifier>
          <dc:date>2023</dc:date>
        </oai_dc:dc>
      </metadata>
    </record>
    <record>
      <header status="deleted">
        <identifier>oai:repo.example.org:102</identifier>
        <datestamp>2024-04-29</datestamp>
      </header>
    </record>
    <resumptionToken completeListSize="250" cursor="0">tok-1</resumptionToken>
  </ListRecords>
</OAI-PMH>"#;

    #[test]
    fn parses_records_and_token() {
        let page = parse_list_records(PAGE).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.resumption_token.as_deref(), Some("tok-1"));
        assert_eq!(page.complete_list_size, Some(250));

        let first = &page.records[0];
        assert_eq!(first.identifier, "oai:repo.example.org:101");
        assert_eq!(first.datestamp.as_deref(), Some("2024-04-30"));
        assert_eq!(first.sets, vec!["publications", "theses"]);
        assert!(!first.deleted);
        let metadata = first.metadata.as_deref().unwrap();
        assert!(metadata.starts_with("<oai_dc:dc"));
        assert!(metadata.contains("Soil &amp; Water"));

        let second = &page.records[1];
        assert!(second.deleted);
        assert!(second.metadata.is_none());
    }

    #[test]
    fn empty_token_is_last_page() {
        let xml = r#"<OAI-PMH><ListRecords>
            <record><header><identifier>oai:x:1</identifier></header></record>
            <resumptionToken completeListSize="1" cursor="0"/>
        </ListRecords></OAI-PMH>"#;
        let page = parse_list_records(xml).unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.resumption_token.is_none());

        let xml = r#"<OAI-PMH><ListRecords><resumptionToken cursor="5"></resumptionToken></ListRecords></OAI-PMH>"#;
        assert!(parse_list_records(xml).unwrap().resumption_token.is_none());
    }

    #[test]
    fn no_records_match_is_empty() {
        let xml = r#"<OAI-PMH><error code="noRecordsMatch">No matching records</error></OAI-PMH>"#;
        let page = parse_list_records(xml).unwrap();
        assert!(page.records.is_empty());
        assert!(page.resumption_token.is_none());
    }

    #[test]
    fn other_error_codes_are_protocol_errors() {
        let xml = r#"<OAI-PMH><error code="badResumptionToken">expired</error></OAI-PMH>"#;
        let err = parse_list_records(xml).unwrap_err();
        assert!(matches!(err, FetchError::Protocol(_)));
        assert_eq!(err.to_string(), "protocol: OAI error badResumptionToken: expired");
    }

    #[test]
    fn malformed_xml_is_parse_error() {
        let err = parse_list_records("<OAI-PMH><ListRecords></OAI-PMH>").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn dublin_core_fields() {
        let page = parse_list_records(PAGE).unwrap();
        let fields = extract_fields(page.records[0].metadata.as_deref().unwrap());
        assert_eq!(fields["title"], "Soil & Water");
        assert_eq!(fields["doi"], "https://doi.org/10.1234/soil.5");
        assert_eq!(fields["date"], "2023");
        assert_eq!(fields["creators"].as_array().unwrap().len(), 2);
    }
}

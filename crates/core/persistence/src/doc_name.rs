//! Doc-name parsing.
//!
//! Doc names encode their kind by prefix convention: `note:<uuid>` for a
//! note's main document, `panel:<uuid>` for a panel document, and
//! `panel:<uuid>:<suffix>` for panel sub-documents. The delete coordinator
//! parses these to decide which rows a cascade touches; everything else in
//! the core treats doc names as opaque strings.

use uuid::Uuid;

/// A parsed doc name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedDocName {
    /// `note:<uuid>`
    Note { note_id: Uuid },
    /// `panel:<uuid>` or `panel:<uuid>:<suffix>`
    Panel { panel_id: Uuid },
}

impl ParsedDocName {
    /// Parses a doc name by its kind prefix.
    pub fn parse(doc_name: &str) -> Result<Self, DocNameError> {
        if let Some(rest) = doc_name.strip_prefix("note:") {
            let note_id = rest
                .parse()
                .map_err(|_| DocNameError::InvalidId(doc_name.to_string()))?;
            return Ok(ParsedDocName::Note { note_id });
        }
        if let Some(rest) = doc_name.strip_prefix("panel:") {
            let id_part = rest.split(':').next().unwrap_or(rest);
            let panel_id = id_part
                .parse()
                .map_err(|_| DocNameError::InvalidId(doc_name.to_string()))?;
            return Ok(ParsedDocName::Panel { panel_id });
        }
        Err(DocNameError::UnknownPrefix(doc_name.to_string()))
    }
}

/// The owning note id, when the doc name is a well-formed note doc.
///
/// Used to fill the snapshot `note_id` column; doc names that do not follow
/// the convention simply leave it null.
pub(crate) fn note_id_of(doc_name: &str) -> Option<Uuid> {
    match ParsedDocName::parse(doc_name) {
        Ok(ParsedDocName::Note { note_id }) => Some(note_id),
        _ => None,
    }
}

/// A doc name that the delete coordinator cannot interpret.
#[derive(Debug, thiserror::Error)]
pub enum DocNameError {
    /// The name does not start with a known kind prefix.
    #[error("doc name has no known kind prefix: '{0}'")]
    UnknownPrefix(String),

    /// The id portion is not a valid UUID.
    #[error("doc name has a malformed id: '{0}'")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_note_docs() {
        let id = Uuid::new_v4();
        let parsed = ParsedDocName::parse(&format!("note:{id}")).expect("should parse");
        assert_eq!(parsed, ParsedDocName::Note { note_id: id });
    }

    #[test]
    fn parses_panel_docs_with_and_without_suffix() {
        let id = Uuid::new_v4();
        assert_eq!(
            ParsedDocName::parse(&format!("panel:{id}")).expect("bare panel"),
            ParsedDocName::Panel { panel_id: id }
        );
        assert_eq!(
            ParsedDocName::parse(&format!("panel:{id}:annotations")).expect("suffixed panel"),
            ParsedDocName::Panel { panel_id: id }
        );
    }

    #[test]
    fn rejects_unknown_prefixes_and_bad_ids() {
        assert!(matches!(
            ParsedDocName::parse("whiteboard:abc"),
            Err(DocNameError::UnknownPrefix(_))
        ));
        assert!(matches!(
            ParsedDocName::parse("note:not-a-uuid"),
            Err(DocNameError::InvalidId(_))
        ));
    }

    #[test]
    fn note_id_extraction_is_lenient() {
        let id = Uuid::new_v4();
        assert_eq!(note_id_of(&format!("note:{id}")), Some(id));
        assert_eq!(note_id_of("note:legacy-doc"), None);
        assert_eq!(note_id_of(&format!("panel:{id}")), None);
    }
}

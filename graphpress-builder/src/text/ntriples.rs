//! Zero-copy tokenizer for one line of N-Triples / N-Quads text.
//!
//! A parsed term borrows the line's bytes in its dictionary-serialized
//! form: IRIs without the surrounding angle brackets, literals verbatim
//! (quotes, escapes, and any `@lang` / `^^<datatype>` suffix included),
//! blank nodes with their `_:` prefix.

use crate::error::{BuildError, Result};

/// Borrowed terms of one parsed triple/quad line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTriple<'a> {
    pub subject: &'a [u8],
    pub predicate: &'a [u8],
    pub object: &'a [u8],
    pub graph: Option<&'a [u8]>,
}

#[inline]
fn is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Strip leading/trailing blank characters.
#[inline]
pub fn trim(line: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = line.len();
    while start < end && is_blank(line[start]) {
        start += 1;
    }
    while end > start && is_blank(line[end - 1]) {
        end -= 1;
    }
    &line[start..end]
}

/// Parse one line. Returns `Ok(None)` for blank lines and `#` comments;
/// malformed lines yield [`BuildError::Malformed`] (callers log and skip
/// them without aborting the chunk).
pub fn parse_line(line: &[u8], quads: bool) -> Result<Option<RawTriple<'_>>> {
    let line = trim(line);
    if line.is_empty() || line[0] == b'#' {
        return Ok(None);
    }
    let Some(body) = line.strip_suffix(b".") else {
        return Err(BuildError::malformed("statement does not end with '.'"));
    };
    let body = trim(body);

    let (subject, rest) = take_subject(body)?;
    let rest = skip_blank(rest)?;
    let (predicate, rest) = take_iri(rest, "predicate")?;
    let rest = skip_blank(rest)?;

    // In quad mode the graph label sits after the object; scanning
    // backward for it avoids having to know where the object ends first.
    let (object_region, graph) = if quads {
        split_graph_term(rest)
    } else {
        (rest, None)
    };

    let object = take_object(object_region)?;
    Ok(Some(RawTriple {
        subject,
        predicate,
        object,
        graph,
    }))
}

fn skip_blank(bytes: &[u8]) -> Result<&[u8]> {
    let trimmed = {
        let mut i = 0;
        while i < bytes.len() && is_blank(bytes[i]) {
            i += 1;
        }
        &bytes[i..]
    };
    if trimmed.len() == bytes.len() {
        return Err(BuildError::malformed("expected whitespace between terms"));
    }
    Ok(trimmed)
}

/// `<iri>` or `_:label` at the start of `bytes`; returns (term, rest).
fn take_subject(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    if bytes.first() == Some(&b'<') {
        return take_iri(bytes, "subject");
    }
    if bytes.starts_with(b"_:") {
        return Ok(take_bnode(bytes));
    }
    Err(BuildError::malformed(
        "subject is neither an IRI nor a blank node",
    ))
}

/// `<iri>` at the start of `bytes`; the returned term excludes the angle
/// brackets.
fn take_iri<'a>(bytes: &'a [u8], what: &str) -> Result<(&'a [u8], &'a [u8])> {
    if bytes.first() != Some(&b'<') {
        return Err(BuildError::malformed(format!("{what} is not an IRI")));
    }
    match bytes.iter().position(|&b| b == b'>') {
        Some(gt) => Ok((&bytes[1..gt], &bytes[gt + 1..])),
        None => Err(BuildError::malformed(format!("{what}: unterminated IRI"))),
    }
}

fn take_bnode(bytes: &[u8]) -> (&[u8], &[u8]) {
    let end = bytes
        .iter()
        .position(|&b| is_blank(b))
        .unwrap_or(bytes.len());
    (&bytes[..end], &bytes[end..])
}

/// Find the closing quote of a literal opened at `bytes[0] == b'"'`:
/// the first `"` preceded by an even run of backslashes.
fn closing_quote(bytes: &[u8]) -> Option<usize> {
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Parse the object term, which must consume all of `bytes`.
fn take_object(bytes: &[u8]) -> Result<&[u8]> {
    let bytes = trim(bytes);
    if bytes.is_empty() {
        return Err(BuildError::malformed("missing object term"));
    }
    match bytes[0] {
        b'<' => {
            let (term, rest) = take_iri(bytes, "object")?;
            if !trim(rest).is_empty() {
                return Err(BuildError::malformed("trailing bytes after object IRI"));
            }
            Ok(term)
        }
        b'_' if bytes.starts_with(b"_:") => {
            let (term, rest) = take_bnode(bytes);
            if !trim(rest).is_empty() {
                return Err(BuildError::malformed(
                    "trailing bytes after object blank node",
                ));
            }
            Ok(term)
        }
        b'"' => {
            let close = closing_quote(bytes)
                .ok_or_else(|| BuildError::malformed("unterminated literal"))?;
            let suffix = &bytes[close + 1..];
            validate_literal_suffix(suffix)?;
            Ok(bytes)
        }
        _ => Err(BuildError::malformed("unrecognized object term")),
    }
}

fn validate_literal_suffix(suffix: &[u8]) -> Result<()> {
    if suffix.is_empty() {
        return Ok(());
    }
    if let Some(lang) = suffix.strip_prefix(b"@") {
        if lang.is_empty()
            || !lang
                .iter()
                .all(|&b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(BuildError::malformed("invalid language tag"));
        }
        return Ok(());
    }
    if let Some(dt) = suffix.strip_prefix(b"^^") {
        let (_, rest) = take_iri(dt, "datatype")?;
        if !rest.is_empty() {
            return Err(BuildError::malformed("trailing bytes after datatype IRI"));
        }
        return Ok(());
    }
    Err(BuildError::malformed("invalid literal suffix"))
}

/// Backward scan for a graph label at the end of the statement body.
///
/// Accepts a whitespace-preceded `<iri>` or `_:label` as the graph term;
/// anything else (including the `>` that ends a `^^<datatype>` suffix,
/// which is preceded by `^^`, not whitespace) leaves the region intact.
/// The returned object region is everything before the graph term. When
/// stripping the candidate would leave no object at all, the candidate
/// *was* the object and there is no graph.
fn split_graph_term(bytes: &[u8]) -> (&[u8], Option<&[u8]>) {
    let trimmed = trim(bytes);
    if trimmed.is_empty() {
        return (bytes, None);
    }

    let candidate_start = match trimmed.last() {
        Some(b'>') => {
            let Some(lt) = trimmed.iter().rposition(|&b| b == b'<') else {
                return (bytes, None);
            };
            lt
        }
        Some(&b) if !is_blank(b) => {
            let start = trimmed
                .iter()
                .rposition(|&b| is_blank(b))
                .map(|p| p + 1)
                .unwrap_or(0);
            if !trimmed[start..].starts_with(b"_:") {
                return (bytes, None);
            }
            start
        }
        _ => return (bytes, None),
    };

    // Must be preceded by whitespace and must not swallow the object.
    if candidate_start == 0 || !is_blank(trimmed[candidate_start - 1]) {
        return (bytes, None);
    }
    let object_region = trim(&trimmed[..candidate_start]);
    if object_region.is_empty() {
        return (bytes, None);
    }

    let graph = match trimmed[candidate_start] {
        b'<' => &trimmed[candidate_start + 1..trimmed.len() - 1],
        _ => &trimmed[candidate_start..],
    };
    (object_region, Some(graph))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str, quads: bool) -> Option<RawTriple<'_>> {
        parse_line(line.as_bytes(), quads).unwrap()
    }

    #[test]
    fn test_simple_triple() {
        let t = parse("<http://a> <http://p> <http://b> .", false).unwrap();
        assert_eq!(t.subject, b"http://a");
        assert_eq!(t.predicate, b"http://p");
        assert_eq!(t.object, b"http://b");
        assert_eq!(t.graph, None);
    }

    #[test]
    fn test_literal_objects() {
        let t = parse(r#"<http://a> <http://p> "hello world" ."#, false).unwrap();
        assert_eq!(t.object, br#""hello world""#);

        let t = parse(r#"<http://a> <http://p> "bonjour"@fr ."#, false).unwrap();
        assert_eq!(t.object, br#""bonjour"@fr"#);

        let t = parse(
            r#"<http://a> <http://p> "42"^^<http://www.w3.org/2001/XMLSchema#int> ."#,
            false,
        )
        .unwrap();
        assert_eq!(
            t.object,
            br#""42"^^<http://www.w3.org/2001/XMLSchema#int>"#
        );
    }

    #[test]
    fn test_escaped_quote_in_literal() {
        let t = parse(r#"<http://a> <http://p> "say \"hi\" now" ."#, false).unwrap();
        assert_eq!(t.object, br#""say \"hi\" now""#);
    }

    #[test]
    fn test_blank_nodes() {
        let t = parse("_:b0 <http://p> _:b1 .", false).unwrap();
        assert_eq!(t.subject, b"_:b0");
        assert_eq!(t.object, b"_:b1");
    }

    #[test]
    fn test_comment_and_blank_lines() {
        assert!(parse("", false).is_none());
        assert!(parse("   \t", false).is_none());
        assert!(parse("# a comment <not> <a> <triple> .", false).is_none());
        assert!(parse("   # indented comment", false).is_none());
    }

    #[test]
    fn test_quad_with_iri_graph() {
        let t = parse("<http://a> <http://p> <http://b> <http://g> .", true).unwrap();
        assert_eq!(t.object, b"http://b");
        assert_eq!(t.graph, Some(&b"http://g"[..]));
    }

    #[test]
    fn test_quad_with_bnode_graph() {
        let t = parse(r#"<http://a> <http://p> "v" _:g1 ."#, true).unwrap();
        assert_eq!(t.object, br#""v""#);
        assert_eq!(t.graph, Some(&b"_:g1"[..]));
    }

    #[test]
    fn test_quad_mode_without_graph() {
        // The trailing IRI is the object itself; it must not be taken as
        // a graph label.
        let t = parse("<http://a> <http://p> <http://b> .", true).unwrap();
        assert_eq!(t.object, b"http://b");
        assert_eq!(t.graph, None);
    }

    #[test]
    fn test_quad_mode_datatype_literal_without_graph() {
        // The datatype's closing '>' is preceded by "^^", not whitespace.
        let t = parse(r#"<http://a> <http://p> "1"^^<http://dt> ."#, true).unwrap();
        assert_eq!(t.object, br#""1"^^<http://dt>"#);
        assert_eq!(t.graph, None);
    }

    #[test]
    fn test_quad_mode_datatype_literal_with_graph() {
        let t = parse(r#"<http://a> <http://p> "1"^^<http://dt> <http://g> ."#, true).unwrap();
        assert_eq!(t.object, br#""1"^^<http://dt>"#);
        assert_eq!(t.graph, Some(&b"http://g"[..]));
    }

    #[test]
    fn test_malformed_lines() {
        for line in [
            "<http://a> <http://p> <http://b>", // no dot
            "<http://a> <http://p> .",          // missing object
            "nonsense .",
            r#"<http://a> <http://p> "unterminated ."#,
            "<http://a> <http://p> <http://b> extra .",
            r#"<http://a> <http://p> "v"@ ."#,
        ] {
            assert!(
                parse_line(line.as_bytes(), false).is_err(),
                "accepted: {line}"
            );
        }
    }
}

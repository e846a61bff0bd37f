use encoding_rs::Encoding;

/// Upper bound on how far into the document the XML declaration may appear.
const DECLARATION_WINDOW: usize = 256;

/// Decodes a body served in a legacy encoding and returns UTF-8 bytes.
///
/// The `encoding="..."` attribute of a leading XML declaration is rewritten
/// to `UTF-8` so an XML reader does not try to decode the result a second
/// time. Bodies without a declaration (HTML, bare XML) pass through with only
/// the transcoding applied. Unmappable bytes become U+FFFD.
pub fn transcode_to_utf8(body: &[u8], encoding: &'static Encoding) -> Vec<u8> {
    let (text, _had_errors) = encoding.decode_without_bom_handling(body);
    rewrite_declaration(&text).into_bytes()
}

fn rewrite_declaration(text: &str) -> String {
    let trimmed = text.trim_start_matches('\u{feff}');
    let head_len = trimmed.len().min(DECLARATION_WINDOW);
    let head_end = (0..=head_len)
        .rev()
        .find(|i| trimmed.is_char_boundary(*i))
        .unwrap_or(0);

    let Some(decl_start) = trimmed[..head_end].find("<?xml") else {
        return trimmed.to_string();
    };
    let Some(decl_len) = trimmed[decl_start..head_end].find("?>") else {
        return trimmed.to_string();
    };
    let decl_end = decl_start + decl_len;
    let decl = &trimmed[decl_start..decl_end];

    let Some(attr) = decl.find("encoding") else {
        return trimmed.to_string();
    };
    let after_name = &decl[attr + "encoding".len()..];
    let Some(eq) = after_name.find('=') else {
        return trimmed.to_string();
    };
    let value = after_name[eq + 1..].trim_start();
    let Some(quote) = value.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        return trimmed.to_string();
    };
    let Some(close) = value[1..].find(quote) else {
        return trimmed.to_string();
    };

    let value_start = decl_start + (decl.len() - value.len()) + 1;
    let value_end = value_start + close;

    let mut out = String::with_capacity(trimmed.len());
    out.push_str(&trimmed[..value_start]);
    out.push_str("UTF-8");
    out.push_str(&trimmed[value_end..]);
    out
}

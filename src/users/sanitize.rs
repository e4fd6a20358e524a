use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// Inline formatting tags that survive cleaning, stripped of attributes.
pub const ALLOWED_TAGS: &[&str] = &["b", "em", "i", "strong"];

lazy_static! {
    static ref SCRIPT_RE: Regex =
        Regex::new(r"(?is)<\s*(?:script|style)\b[^>]*>.*?<\s*/\s*(?:script|style)\s*>").unwrap();
    static ref MARKUP_RE: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref TAG_RE: Regex = Regex::new(r"^<\s*(/?)\s*([A-Za-z][A-Za-z0-9]*)(?:\s[^>]*)?/?>$").unwrap();
}

/// Strips markup from user text, keeping only [`ALLOWED_TAGS`].
///
/// Script and style elements go away with their content. Everything else
/// between `<` and the next `>` is dropped unless it is an allowed tag.
/// Never lengthens its input, and `clean(clean(x)) == clean(x)`.
pub fn clean(text: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(text, "");
    MARKUP_RE
        .replace_all(&without_scripts, |caps: &Captures| {
            let markup = &caps[0];
            match TAG_RE.captures(markup) {
                Some(tag) => {
                    let name = tag[2].to_ascii_lowercase();
                    if ALLOWED_TAGS.contains(&name.as_str()) {
                        format!("<{}{}>", &tag[1], name)
                    } else {
                        String::new()
                    }
                }
                None => String::new(),
            }
        })
        .into_owned()
}

//! Named-placeholder substitution.
//!
//! Two syntaxes are in use: `%(name)` for shell command templates and
//! `${name}` for documents fetched from the add-on's base URL (email
//! templates, the platform script).

#[derive(Debug, Clone, Copy)]
pub struct Syntax {
    open: &'static str,
    close: char,
}

/// `%(name)`, used by shell command templates.
pub const COMMAND: Syntax = Syntax {
    open: "%(",
    close: ')',
};

/// `${name}`, used by documents.
pub const DOCUMENT: Syntax = Syntax {
    open: "${",
    close: '}',
};

enum Segment<'a> {
    Text(&'a str),
    Placeholder { name: &'a str, raw: &'a str },
}

fn scan<'a>(text: &'a str, syntax: Syntax, mut emit: impl FnMut(Segment<'a>)) {
    let mut rest = text;
    while let Some(start) = rest.find(syntax.open) {
        let inner = &rest[start + syntax.open.len()..];
        let Some(end) = inner.find(syntax.close) else {
            break;
        };
        let raw_end = start + syntax.open.len() + end + syntax.close.len_utf8();
        emit(Segment::Text(&rest[..start]));
        emit(Segment::Placeholder {
            name: &inner[..end],
            raw: &rest[start..raw_end],
        });
        rest = &rest[raw_end..];
    }
    emit(Segment::Text(rest));
}

/// Names of all placeholders in `text`, in order of appearance.
pub fn placeholders(text: &str, syntax: Syntax) -> Vec<&str> {
    let mut names = vec![];
    scan(text, syntax, |segment| {
        if let Segment::Placeholder { name, .. } = segment {
            names.push(name);
        }
    });
    names
}

/// Replace every placeholder `lookup` knows about. Unknown placeholders are
/// left in place.
pub fn render(text: &str, syntax: Syntax, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(text.len());
    scan(text, syntax, |segment| match segment {
        Segment::Text(text) => output.push_str(text),
        Segment::Placeholder { name, raw } => match lookup(name) {
            Some(value) => output.push_str(&value),
            None => output.push_str(raw),
        },
    });
    output
}

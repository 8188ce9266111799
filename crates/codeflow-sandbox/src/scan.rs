//! Textual scan for secret references.
//!
//! Only secrets whose names appear in the source as `secrets.NAME`,
//! `secrets['NAME']` or `secrets["NAME"]` are ever decrypted; everything
//! else stays ciphertext, limiting blast radius if the sandbox is ever
//! escaped.

use std::collections::HashSet;

pub fn referenced_secret_names(source: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let bytes = source.as_bytes();
    let needle = b"secrets";

    let mut i = 0;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] != needle {
            i += 1;
            continue;
        }
        // Word boundary on the left.
        if i > 0 {
            let prev = bytes[i - 1] as char;
            if prev.is_ascii_alphanumeric() || prev == '_' || prev == '$' {
                i += 1;
                continue;
            }
        }
        let after = i + needle.len();
        match bytes.get(after) {
            Some(b'.') => {
                if let Some(name) = take_identifier(&source[after + 1..]) {
                    names.insert(name);
                }
            }
            Some(b'[') => {
                if let Some(name) = take_quoted(&source[after + 1..]) {
                    names.insert(name);
                }
            }
            _ => {}
        }
        i = after;
    }
    names
}

fn take_identifier(rest: &str) -> Option<String> {
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn take_quoted(rest: &str) -> Option<String> {
    let mut chars = rest.chars();
    let quote = match chars.next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return None,
    };
    let mut name = String::new();
    for c in chars {
        if c == quote {
            return if name.is_empty() { None } else { Some(name) };
        }
        name.push(c);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_all_reference_forms() {
        let src = r#"
            let a = secrets.API_KEY;
            let b = secrets['DB_PASSWORD'];
            let c = secrets["WEBHOOK_TOKEN"];
        "#;
        let names = referenced_secret_names(src);
        assert_eq!(names.len(), 3);
        assert!(names.contains("API_KEY"));
        assert!(names.contains("DB_PASSWORD"));
        assert!(names.contains("WEBHOOK_TOKEN"));
    }

    #[test]
    fn unreferenced_names_are_absent() {
        let names = referenced_secret_names("output.x = secrets.USED;");
        assert!(names.contains("USED"));
        assert!(!names.contains("UNUSED"));
    }

    #[test]
    fn respects_word_boundary() {
        let names = referenced_secret_names("mysecrets.NOPE; secrets.YES;");
        assert!(!names.contains("NOPE"));
        assert!(names.contains("YES"));
    }

    #[test]
    fn ignores_malformed_brackets() {
        let names = referenced_secret_names("secrets[API_KEY]; secrets['']");
        assert!(names.is_empty());
    }

    #[test]
    fn empty_source_yields_nothing() {
        assert!(referenced_secret_names("").is_empty());
    }
}

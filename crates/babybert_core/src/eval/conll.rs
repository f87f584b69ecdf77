//! CoNLL-2005 export for the `srl-eval.pl` scorer
//!
//! One line per word: the predicate column (the word itself on the predicate,
//! `-` elsewhere) left-justified to 15 characters, then the bracketed span
//! column right-justified to 15. Sentences are separated by a blank line.

use std::io::Write;

use crate::error::Result;

const COLUMN_WIDTH: usize = 15;

/// Converts word-level BIO tags into bracketed spans, e.g.
/// `B-ARG0 I-ARG0 B-V O` becomes `(ARG0* *) (V*) *`.
///
/// Invalid sequences (an `I-` tag that continues nothing) open a new span.
pub fn bio_to_conll<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let labels: Vec<&str> = labels.iter().map(AsRef::as_ref).collect();
    let n = labels.len();
    let mut res = Vec::with_capacity(n);

    for (i, &label) in labels.iter().enumerate() {
        if label == "O" {
            res.push("*".to_string());
            continue;
        }
        let role = label.get(2..).unwrap_or("");
        let starts = label.starts_with('B') || i == 0 || label.get(1..) != labels[i - 1].get(1..);
        let ends = i == n - 1
            || labels[i + 1].starts_with('B')
            || label.get(1..) != labels[i + 1].get(1..);

        let mut tag = String::new();
        if starts {
            tag.push('(');
            tag.push_str(role);
        }
        tag.push('*');
        if ends {
            tag.push(')');
        }
        res.push(tag);
    }
    res
}

/// Appends one proposition to a CoNLL file.
pub fn write_conll<W: Write, S: AsRef<str>, L: AsRef<str>>(
    out: &mut W,
    words: &[S],
    predicate_index: usize,
    labels: &[L],
) -> Result<()> {
    let spans = bio_to_conll(labels);
    for (i, (word, span)) in words.iter().zip(&spans).enumerate() {
        let predicate = if i == predicate_index {
            word.as_ref()
        } else {
            "-"
        };
        writeln!(out, "{predicate:<COLUMN_WIDTH$}{span:>COLUMN_WIDTH$}")?;
    }
    writeln!(out)?;
    Ok(())
}

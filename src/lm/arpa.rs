//! ARPA text format reader.
//!
//! Parses the `\data\` header, per-order n-gram sections, and `\end\`
//! marker into an intermediate [`ArpaFile`] that the model builder
//! consumes. Structural problems (missing sections, count mismatches,
//! non-finite probabilities) are fatal; absent backoff fields are the
//! format's way of saying 0.0 and are not errors.

use std::io::BufRead;

use super::LmError;

#[derive(Debug, Clone)]
pub struct ArpaNgram {
    /// Words oldest first, exactly as they appear in the file.
    pub words: Vec<String>,
    pub prob: f32,
    pub backoff: f32,
}

#[derive(Debug)]
pub struct ArpaFile {
    /// Declared n-gram counts, `counts[0]` being unigrams.
    pub counts: Vec<usize>,
    /// Parsed entries per order, parallel to `counts`.
    pub sections: Vec<Vec<ArpaNgram>>,
}

impl ArpaFile {
    pub fn order(&self) -> u8 {
        self.counts.len() as u8
    }
}

fn parse_err(line: usize, reason: impl Into<String>) -> LmError {
    LmError::Parse {
        line,
        reason: reason.into(),
    }
}

pub fn read_arpa<R: BufRead>(reader: R) -> Result<ArpaFile, LmError> {
    let mut lines = reader.lines().enumerate();

    // Locate \data\, skipping any leading junk (some tools emit comments).
    let data_line = loop {
        match lines.next() {
            Some((n, line)) => {
                if line?.trim() == "\\data\\" {
                    break n + 1;
                }
            }
            None => return Err(parse_err(0, "missing \\data\\ header")),
        }
    };

    // ngram N=count lines, terminated by a blank line.
    let mut counts: Vec<usize> = Vec::new();
    loop {
        let (n, line) = lines
            .next()
            .ok_or_else(|| parse_err(data_line, "unterminated \\data\\ section"))?;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        let rest = trimmed
            .strip_prefix("ngram ")
            .ok_or_else(|| parse_err(n + 1, format!("expected 'ngram N=count', got '{trimmed}'")))?;
        let (order_str, count_str) = rest
            .split_once('=')
            .ok_or_else(|| parse_err(n + 1, "expected '=' in ngram count line"))?;
        let order: usize = order_str
            .trim()
            .parse()
            .map_err(|_| parse_err(n + 1, "bad n-gram order"))?;
        let count: usize = count_str
            .trim()
            .parse()
            .map_err(|_| parse_err(n + 1, "bad n-gram count"))?;
        if order != counts.len() + 1 {
            return Err(parse_err(n + 1, "n-gram orders must be consecutive from 1"));
        }
        counts.push(count);
    }
    if counts.is_empty() {
        return Err(parse_err(data_line, "\\data\\ section declares no orders"));
    }

    // Per-order sections.
    let max_order = counts.len();
    let mut sections: Vec<Vec<ArpaNgram>> = Vec::with_capacity(max_order);
    for (order, &expected) in counts.iter().enumerate() {
        let order = order + 1;
        let header = format!("\\{order}-grams:");
        // Seek the section header.
        loop {
            let (n, line) = lines
                .next()
                .ok_or_else(|| parse_err(0, format!("missing section {header}")))?;
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == header {
                break;
            }
            return Err(parse_err(n + 1, format!("expected {header}, got '{trimmed}'")));
        }

        let mut entries = Vec::with_capacity(expected);
        loop {
            let (n, line) = lines
                .next()
                .ok_or_else(|| parse_err(0, format!("unterminated section {header}")))?;
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            let mut tokens = trimmed.split_whitespace();
            let prob: f32 = tokens
                .next()
                .ok_or_else(|| parse_err(n + 1, "empty entry"))?
                .parse()
                .map_err(|_| parse_err(n + 1, "bad probability"))?;
            if !prob.is_finite() {
                return Err(parse_err(n + 1, "non-finite probability"));
            }
            let rest: Vec<&str> = tokens.collect();
            let (words, backoff) = match rest.len() {
                l if l == order => (rest, 0.0f32),
                l if l == order + 1 => {
                    let backoff: f32 = rest[order]
                        .parse()
                        .map_err(|_| parse_err(n + 1, "bad backoff weight"))?;
                    if !backoff.is_finite() {
                        return Err(parse_err(n + 1, "non-finite backoff weight"));
                    }
                    (rest[..order].to_vec(), backoff)
                }
                _ => {
                    return Err(parse_err(
                        n + 1,
                        format!("expected {order} words (+ optional backoff)"),
                    ))
                }
            };
            entries.push(ArpaNgram {
                words: words.into_iter().map(str::to_string).collect(),
                prob,
                backoff,
            });
        }
        if entries.len() != expected {
            return Err(parse_err(
                0,
                format!(
                    "section {header} declares {expected} entries but contains {}",
                    entries.len()
                ),
            ));
        }
        sections.push(entries);
    }

    // \end\ marker.
    loop {
        match lines.next() {
            Some((_, line)) => {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "\\end\\" {
                    break;
                }
                return Err(parse_err(0, format!("expected \\end\\, got '{trimmed}'")));
            }
            None => return Err(parse_err(0, "missing \\end\\ marker")),
        }
    }

    Ok(ArpaFile { counts, sections })
}

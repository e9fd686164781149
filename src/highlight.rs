//! Marking search matches inside task text.

use regex::RegexBuilder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
  pub text: &'a str,
  pub is_match: bool,
}

/// Split `text` around case-insensitive occurrences of `query`.
///
/// The query is matched literally. A blank query returns the whole text as
/// a single unmatched segment; empty segments are never produced, so empty
/// text yields none.
pub fn highlight_matches<'a>(text: &'a str, query: &str) -> Vec<Segment<'a>> {
  if text.is_empty() {
    return Vec::new();
  }
  let query = query.trim();
  if query.is_empty() {
    return vec![Segment {
      text,
      is_match: false,
    }];
  }

  let re = match RegexBuilder::new(&regex::escape(query))
    .case_insensitive(true)
    .build()
  {
    Ok(re) => re,
    Err(_) => {
      return vec![Segment {
        text,
        is_match: false,
      }]
    }
  };

  let mut segments = Vec::new();
  let mut last = 0;
  for m in re.find_iter(text) {
    if m.start() > last {
      segments.push(Segment {
        text: &text[last..m.start()],
        is_match: false,
      });
    }
    segments.push(Segment {
      text: m.as_str(),
      is_match: true,
    });
    last = m.end();
  }
  if last < text.len() {
    segments.push(Segment {
      text: &text[last..],
      is_match: false,
    });
  }
  segments
}

/// Case-insensitive substring test.
pub fn matches_query(text: &str, query: &str) -> bool {
  let query = query.trim();
  !query.is_empty() && text.to_lowercase().contains(&query.to_lowercase())
}

/// Render segments for a terminal, wrapping matches in bold ANSI escapes.
pub fn render_ansi(segments: &[Segment<'_>]) -> String {
  segments
    .iter()
    .map(|s| {
      if s.is_match {
        format!("\x1b[1;33m{}\x1b[0m", s.text)
      } else {
        s.text.to_string()
      }
    })
    .collect()
}

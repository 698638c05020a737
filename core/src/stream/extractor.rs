use std::collections::HashSet;

use tracing::debug;

/// One complete tagged block lifted out of the assistant text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBlock {
  /// Recognized tag the block opens with.
  pub tag: String,
  /// Exact block text, opening tag through closing tag.
  pub raw: String,
}

/// Output of the extractor, in text order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Prose that can no longer be part of any block.
  Text(String),
  Block(ExtractedBlock),
}

/// Scans an accumulating buffer for complete tool blocks as fragments arrive.
///
/// The buffer holds only the undecided tail of the turn: released prose and
/// extracted blocks are removed from it. Scanning always restarts at the
/// leftmost candidate, so feeding the same text in one piece or in many
/// yields the same ordered segments.
#[derive(Debug)]
pub struct IncrementalExtractor {
  tags: Vec<String>,
  buffer: String,
  processed: HashSet<String>,
}

enum OpenMatch {
  Tag(usize),
  Partial,
  None,
}

enum BlockEnd {
  Complete(usize),
  Incomplete,
}

impl IncrementalExtractor {
  pub fn new<I, S>(tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut tags: Vec<String> = tags
      .into_iter()
      .map(Into::into)
      .filter(|tag| !tag.is_empty())
      .collect();
    // Longest first so `create-file` is tried before a shorter prefix tag.
    tags.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    tags.dedup();
    Self {
      tags,
      buffer: String::new(),
      processed: HashSet::new(),
    }
  }

  /// Text received but not yet released or extracted.
  pub fn pending(&self) -> &str {
    &self.buffer
  }

  /// Appends a fragment and returns everything that became decidable.
  pub fn push(&mut self, fragment: &str) -> Vec<Segment> {
    self.buffer.push_str(fragment);
    self.scan()
  }

  /// Ends the stream. Whatever is still pending, including an unterminated
  /// block and anything that followed it, is released as literal text.
  pub fn finish(&mut self) -> Vec<Segment> {
    let mut segments = self.scan();
    if !self.buffer.is_empty() {
      segments.push(Segment::Text(std::mem::take(&mut self.buffer)));
    }
    segments
  }

  fn scan(&mut self) -> Vec<Segment> {
    let mut segments = Vec::new();

    loop {
      let Some((start, tag_index)) = self.find_candidate(&mut segments) else {
        break;
      };
      let tag = self.tags[tag_index].clone();

      let end = match find_block_end(&self.buffer, start, &tag) {
        BlockEnd::Complete(end) => end,
        BlockEnd::Incomplete => break,
      };

      let raw: String = self.buffer.drain(start..end).collect();
      if self.processed.insert(raw.clone()) {
        debug!(tag = %tag, len = raw.len(), "extracted tool block");
        segments.push(Segment::Block(ExtractedBlock { tag, raw }));
      } else {
        debug!(tag = %tag, "skipped duplicate tool block");
      }
    }

    segments
  }

  /// Finds the leftmost opening tag. Prose ahead of it is moved out of the
  /// buffer into `segments`. Returns `None` when no candidate is decidable
  /// yet, after releasing everything that safely can be.
  fn find_candidate(&mut self, segments: &mut Vec<Segment>) -> Option<(usize, usize)> {
    let mut search_from = 0;
    while let Some(offset) = self.buffer[search_from..].find('<') {
      let position = search_from + offset;
      match self.match_open(&self.buffer[position + 1..]) {
        OpenMatch::Tag(tag_index) => {
          self.release(position, segments);
          return Some((0, tag_index));
        }
        OpenMatch::Partial => {
          self.release(position, segments);
          return None;
        }
        OpenMatch::None => search_from = position + 1,
      }
    }
    let all = self.buffer.len();
    self.release(all, segments);
    None
  }

  fn release(&mut self, upto: usize, segments: &mut Vec<Segment>) {
    if upto == 0 {
      return;
    }
    let text: String = self.buffer.drain(..upto).collect();
    match segments.last_mut() {
      Some(Segment::Text(previous)) => previous.push_str(&text),
      _ => segments.push(Segment::Text(text)),
    }
  }

  /// `rest` is the text right after a `<`.
  fn match_open(&self, rest: &str) -> OpenMatch {
    let mut partial = false;
    for (index, tag) in self.tags.iter().enumerate() {
      if let Some(after) = rest.strip_prefix(tag.as_str()) {
        match after.chars().next() {
          None => partial = true,
          Some(next) if is_name_delimiter(next) => return OpenMatch::Tag(index),
          Some(_) => {}
        }
      } else if tag.starts_with(rest) {
        partial = true;
      }
    }
    if partial {
      OpenMatch::Partial
    } else {
      OpenMatch::None
    }
  }
}

fn is_name_delimiter(ch: char) -> bool {
  ch.is_whitespace() || ch == '>' || ch == '/'
}

/// Returns the byte index just past the `>` closing the tag that starts at
/// `start`, honoring quoted attribute values, plus whether it self-closes.
fn opening_tag_end(text: &str, start: usize) -> Option<(usize, bool)> {
  let mut quote: Option<char> = None;
  let mut previous = '\0';
  for (offset, ch) in text[start..].char_indices() {
    match quote {
      Some(open) if ch == open => quote = None,
      Some(_) => {}
      None if ch == '"' || ch == '\'' => quote = Some(ch),
      None if ch == '>' => return Some((start + offset + 1, previous == '/')),
      None => {}
    }
    previous = ch;
  }
  None
}

/// Index just past `</tag   >` if one starts at `position`.
fn closing_tag_end(text: &str, position: usize, tag: &str) -> Option<Option<usize>> {
  let rest = &text[position..];
  let after_name = rest.strip_prefix("</")?.strip_prefix(tag)?;
  let trimmed = after_name.trim_start();
  if trimmed.is_empty() {
    // Decidable only once more text arrives.
    return Some(None);
  }
  if !trimmed.starts_with('>') {
    return None;
  }
  let consumed = rest.len() - trimmed.len() + 1;
  Some(Some(position + consumed))
}

fn find_block_end(text: &str, start: usize, tag: &str) -> BlockEnd {
  let Some((mut cursor, self_closing)) = opening_tag_end(text, start) else {
    return BlockEnd::Incomplete;
  };
  if self_closing {
    return BlockEnd::Complete(cursor);
  }

  let mut depth = 1usize;
  while let Some(offset) = text[cursor..].find('<') {
    let position = cursor + offset;

    match closing_tag_end(text, position, tag) {
      Some(Some(end)) => {
        depth -= 1;
        if depth == 0 {
          return BlockEnd::Complete(end);
        }
        cursor = end;
        continue;
      }
      Some(None) => return BlockEnd::Incomplete,
      None => {}
    }

    if let Some(after) = text[position + 1..].strip_prefix(tag) {
      match after.chars().next() {
        None => return BlockEnd::Incomplete,
        Some(next) if is_name_delimiter(next) => {
          let Some((nested_end, nested_self_closing)) = opening_tag_end(text, position) else {
            return BlockEnd::Incomplete;
          };
          if !nested_self_closing {
            depth += 1;
          }
          cursor = nested_end;
          continue;
        }
        Some(_) => {}
      }
    }

    cursor = position + 1;
  }

  BlockEnd::Incomplete
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  const TAGS: [&str; 4] = ["create-file", "web-search", "execute-command", "sandbox"];

  fn extractor() -> IncrementalExtractor {
    IncrementalExtractor::new(TAGS)
  }

  fn blocks(segments: &[Segment]) -> Vec<String> {
    segments
      .iter()
      .filter_map(|segment| match segment {
        Segment::Block(block) => Some(block.raw.clone()),
        Segment::Text(_) => None,
      })
      .collect()
  }

  fn text(segments: &[Segment]) -> String {
    segments
      .iter()
      .filter_map(|segment| match segment {
        Segment::Text(text) => Some(text.as_str()),
        Segment::Block(_) => None,
      })
      .collect()
  }

  fn run_pieces(pieces: &[&str]) -> Vec<Segment> {
    let mut extractor = extractor();
    let mut segments = Vec::new();
    for piece in pieces {
      segments.extend(extractor.push(piece));
    }
    segments.extend(extractor.finish());
    segments
  }

  #[test]
  fn no_premature_extraction() {
    let mut extractor = extractor();
    assert!(blocks(&extractor.push("<create-file path=\"a.md\">")).is_empty());
    assert!(blocks(&extractor.push("hello")).is_empty());

    let segments = extractor.push("</create-file>");
    assert_eq!(
      blocks(&segments),
      vec!["<create-file path=\"a.md\">hello</create-file>".to_string()]
    );
    assert!(extractor.pending().is_empty());
  }

  #[test]
  fn leftmost_block_wins_regardless_of_tag() {
    let segments = run_pieces(&[
      "a <web-search query=\"x\"></web-search> b <create-file path=\"f\">c</create-file>",
    ]);
    assert_eq!(
      blocks(&segments),
      vec![
        "<web-search query=\"x\"></web-search>".to_string(),
        "<create-file path=\"f\">c</create-file>".to_string(),
      ]
    );
    assert_eq!(text(&segments), "a  b ");
  }

  #[test]
  fn split_invariance_over_every_two_and_three_way_split() {
    let source = "Intro <create-file path=\"x.md\">A <create-file> inside</create-file> tail</create-file> mid \
      <web-search query='a > b'/> then <execute-command command=\"ls\"></execute-command> <unknown>x</unknown> end";
    let whole = run_pieces(&[source]);
    let expected_blocks = blocks(&whole);
    let expected_text = text(&whole);
    assert_eq!(expected_blocks.len(), 3);

    let boundaries: Vec<usize> = source.char_indices().map(|(index, _)| index).collect();
    for &first in &boundaries {
      let split = run_pieces(&[&source[..first], &source[first..]]);
      assert_eq!(blocks(&split), expected_blocks, "split at {first}");
      assert_eq!(text(&split), expected_text, "split at {first}");
    }
    for &first in boundaries.iter().step_by(7) {
      for &second in boundaries.iter().filter(|&&b| b >= first).step_by(5) {
        let split = run_pieces(&[&source[..first], &source[first..second], &source[second..]]);
        assert_eq!(blocks(&split), expected_blocks, "split at {first}/{second}");
      }
    }
  }

  #[test]
  fn nested_same_name_tag_tracks_depth() {
    let segments = run_pieces(&[
      "<create-file path=\"doc.md\">see <create-file path=\"inner\">x</create-file> here</create-file>",
    ]);
    assert_eq!(
      blocks(&segments),
      vec![
        "<create-file path=\"doc.md\">see <create-file path=\"inner\">x</create-file> here</create-file>"
          .to_string()
      ]
    );
  }

  #[test]
  fn similar_tag_names_are_left_as_text() {
    let segments = run_pieces(&["<web-searcher>q</web-searcher> <read-file path=\"a\"/>"]);
    assert!(blocks(&segments).is_empty());
    assert_eq!(
      text(&segments),
      "<web-searcher>q</web-searcher> <read-file path=\"a\"/>"
    );
  }

  #[test]
  fn partial_opening_is_held_back() {
    let mut extractor = extractor();
    let segments = extractor.push("Let me <cre");
    assert_eq!(text(&segments), "Let me ");
    assert_eq!(extractor.pending(), "<cre");

    let segments = extractor.push("ative idea");
    assert_eq!(text(&segments), "<creative idea");
  }

  #[test]
  fn duplicate_block_is_removed_but_not_returned() {
    let block = "<web-search query=\"AAPL\"></web-search>";
    let segments = run_pieces(&[block, " and again ", block, "."]);
    assert_eq!(blocks(&segments), vec![block.to_string()]);
    assert_eq!(text(&segments), " and again .");
  }

  #[test]
  fn unterminated_block_is_released_on_finish() {
    let mut extractor = extractor();
    let head = extractor.push("ok <execute-command command=\"ls\">");
    assert_eq!(text(&head), "ok ");
    let tail = extractor.finish();
    assert_eq!(text(&tail), "<execute-command command=\"ls\">");
    assert!(blocks(&tail).is_empty());
  }

  #[test]
  fn closing_tag_with_whitespace_completes_block() {
    let segments = run_pieces(&["<sandbox action=\"list-files\"></sandbox >!"]);
    assert_eq!(
      blocks(&segments),
      vec!["<sandbox action=\"list-files\"></sandbox >".to_string()]
    );
    assert_eq!(text(&segments), "!");
  }

  #[test]
  fn unclosed_prose_mention_holds_back_the_rest_of_the_turn() {
    let source = "Use the <web-search> tag for news. <create-file path=\"a.md\">x</create-file> done";
    let mut extractor = extractor();
    let streamed = extractor.push(source);
    assert_eq!(text(&streamed), "Use the ");
    assert!(blocks(&streamed).is_empty());
    assert!(extractor.pending().starts_with("<web-search>"));

    let tail = extractor.finish();
    assert!(blocks(&tail).is_empty());
    assert_eq!(
      text(&tail),
      "<web-search> tag for news. <create-file path=\"a.md\">x</create-file> done"
    );
  }
}

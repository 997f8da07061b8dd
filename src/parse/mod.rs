//! Best-effort parsing of free-text model output.
//!
//! The model is asked for fixed headings, but nothing guarantees it complies.
//! Every function here is total: malformed input degrades to the
//! [`UNPARSED`] / [`NOT_AVAILABLE`] sentinels instead of failing.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Key holding the whole text when no heading matched.
pub const UNPARSED: &str = "unparsed";
/// Stands in for a score or rationale that could not be found.
pub const NOT_AVAILABLE: &str = "N/A";

static MARKDOWN_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{0,3}#{1,6}\s+(?P<name>\S.*?)(?:\s+#+)?\s*$").expect("heading regex")
});
static CLOSING_HASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+#+$").expect("closing hashes regex"));
static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+\s*[.)．、:：]\s*)+").expect("number regex"));
static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\)|（[^（）]*）").expect("paren regex"));
static SCORE_DELIMITER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*#{1,6}[ \t]*(?:\d+[ \t]*[.)．、:：][ \t]*)*\**[ \t]*(?:品質|評価|事業評価)?(?:スコア|(?i:quality\s+score|score))[^\n]*$",
    )
    .expect("delimiter regex")
});
static SCORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:スコア|(?i:score))[^0-9\n]{0,12}?(\d{1,3})\s*[/／]\s*100").expect("score regex")
});
static BARE_SCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})\s*[/／]\s*100").expect("bare score regex"));
static RATIONALE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:根拠|理由|(?i:rationale|reason))\**\s*[:：]\s*\**").expect("rationale regex")
});

/// ========================================
/// Heading-delimited blocks
/// ========================================

/// Recognizes heading lines. The pattern must define a `name` capture group.
#[derive(Debug, Clone)]
pub struct HeadingGrammar {
    pattern: Regex,
}

impl HeadingGrammar {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }

    /// `#`-style markdown headings of any level.
    pub fn markdown() -> Self {
        Self::new(MARKDOWN_HEADING.clone())
    }

    fn heading<'t>(&self, line: &'t str) -> Option<&'t str> {
        self.pattern
            .captures(line)
            .and_then(|c| c.name("name"))
            .map(|m| m.as_str())
    }
}

impl Default for HeadingGrammar {
    fn default() -> Self {
        Self::markdown()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub heading: String,
    pub body: String,
}

/// Ordered mapping from cleaned heading to trimmed body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sections {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub preamble: String,
    blocks: Vec<Block>,
}

impl Sections {
    pub fn get(&self, heading: &str) -> Option<&str> {
        self.blocks
            .iter()
            .find(|b| b.heading == heading)
            .map(|b| b.body.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn headings(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.heading.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// True when no heading was recognized.
    pub fn is_unparsed(&self) -> bool {
        self.blocks.len() == 1 && self.blocks[0].heading == UNPARSED
    }

    /// Re-serializes into text that parses back to the same sections.
    pub fn to_markdown(&self) -> String {
        // a synthetic heading would turn unparsed text into a real block
        if self.is_unparsed() && self.preamble.is_empty() {
            let body = &self.blocks[0].body;
            return if body.is_empty() { String::new() } else { format!("{body}\n") };
        }
        let mut out = String::new();
        if !self.preamble.is_empty() {
            out.push_str(&self.preamble);
            out.push_str("\n\n");
        }
        for b in &self.blocks {
            out.push_str("### ");
            out.push_str(&b.heading);
            out.push('\n');
            if !b.body.is_empty() {
                out.push_str(&b.body);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }

    fn push(&mut self, heading: String, body: String) {
        match self.blocks.iter_mut().find(|b| b.heading == heading) {
            Some(existing) => {
                if existing.body.is_empty() {
                    existing.body = body;
                } else if !body.is_empty() {
                    existing.body.push_str("\n\n");
                    existing.body.push_str(&body);
                }
            }
            None => self.blocks.push(Block { heading, body }),
        }
    }
}

/// Strips numbering, emphasis markers, trailing colons and parenthetical notes.
pub fn clean_heading(raw: &str) -> String {
    let mut name = raw.trim().to_string();
    loop {
        let before = name.clone();
        name = name.trim_matches(|c: char| c == '*' || c == '_' || c.is_whitespace()).to_string();
        name = LEADING_NUMBER.replace(&name, "").to_string();
        name = PARENTHETICAL.replace_all(&name, "").to_string();
        name = CLOSING_HASHES.replace(&name, "").to_string();
        name = name
            .trim_end_matches(|c: char| c == ':' || c == '：' || c.is_whitespace())
            .to_string();
        if name == before {
            break;
        }
    }
    if name.is_empty() {
        raw.trim().to_string()
    } else {
        name
    }
}

/// Drops blank lines at both ends and trailing whitespace. Indentation is kept, so an
/// indented line that looks like a heading never becomes one on re-serialization.
fn trim_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.trim().is_empty()).map_or(start, |i| i + 1);
    lines[start..end].join("\n").trim_end().to_string()
}

/// Splits `text` into blocks, opening a new block at every heading line.
pub fn parse_blocks(text: &str, grammar: &HeadingGrammar) -> Sections {
    let mut sections = Sections::default();
    let mut preamble: Vec<&str> = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(raw) = grammar.heading(line) {
            if let Some((heading, body)) = current.take() {
                sections.push(heading, trim_lines(&body));
            }
            current = Some((clean_heading(raw), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        } else {
            preamble.push(line);
        }
    }

    match current {
        Some((heading, body)) => {
            sections.push(heading, trim_lines(&body));
            sections.preamble = trim_lines(&preamble);
        }
        None if sections.is_empty() => {
            sections.push(UNPARSED.to_string(), trim_lines(&preamble));
        }
        None => {}
    }
    sections
}

/// ========================================
/// Candidate items
/// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Targets,
    Problems,
    Moats,
    Stories,
}

impl ItemKind {
    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Targets => "ターゲット案",
            ItemKind::Problems => "課題",
            ItemKind::Moats => "モート案",
            ItemKind::Stories => "ストーリー案",
        }
    }

    fn pattern(self) -> &'static Regex {
        static PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
            [ItemKind::Targets, ItemKind::Problems, ItemKind::Moats, ItemKind::Stories].map(|kind| {
                let label = regex::escape(kind.label());
                Regex::new(&format!(r"^\*\*\s*(?P<label>{label}\s*\d+)")).expect("item regex")
            })
        });
        &PATTERNS[self as usize]
    }
}

/// One selectable candidate such as `**ターゲット案1: X**` followed by its detail lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    /// Stable display name, e.g. `ターゲット案1`.
    pub name: String,
    /// The full heading line as generated.
    pub title: String,
    pub content: String,
}

type Pending<'t> = Option<(String, String, Vec<&'t str>)>;

fn finish(entry: Pending<'_>, items: &mut Vec<Item>) {
    let Some((name, title, lines)) = entry else { return };
    if lines.is_empty() {
        return;
    }
    let name = if items.iter().any(|i| i.name == name) {
        format!("候補{}", items.len() + 1)
    } else {
        name
    };
    items.push(Item { name, title, content: lines.join("\n") });
}

/// Extracts numbered candidates. Items without any detail line are dropped.
pub fn parse_items(text: &str, kind: ItemKind) -> Vec<Item> {
    let pattern = kind.pattern();
    let mut items = Vec::new();
    let mut current: Pending<'_> = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(caps) = pattern.captures(line) {
            finish(current.take(), &mut items);
            let name: String = caps["label"].chars().filter(|c| !c.is_whitespace()).collect();
            current = Some((name, line.to_string(), Vec::new()));
        } else if let Some((_, _, lines)) = current.as_mut() {
            if !line.is_empty() {
                lines.push(line);
            }
        }
    }
    finish(current.take(), &mut items);
    items
}

/// ========================================
/// Score and rationale
/// ========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreCard {
    /// Everything after the score delimiter, trimmed.
    pub section: String,
    /// Score digits (0-100) or [`NOT_AVAILABLE`].
    pub score: String,
    pub rationale: String,
}

impl ScoreCard {
    fn unavailable() -> Self {
        Self {
            section: String::new(),
            score: NOT_AVAILABLE.to_string(),
            rationale: NOT_AVAILABLE.to_string(),
        }
    }

    pub fn value(&self) -> Option<u8> {
        self.score.parse().ok()
    }

    pub fn display(&self) -> String {
        match self.value() {
            Some(v) => format!("{v}/100"),
            None => NOT_AVAILABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scored {
    pub draft: Sections,
    pub card: ScoreCard,
}

impl Scored {
    /// Draft blocks, then the score section under a `## 品質スコア` heading.
    pub fn to_markdown(&self) -> String {
        let mut out = self.draft.to_markdown();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("## 品質スコア\n");
        out.push_str(&self.card.section);
        out.push('\n');
        out
    }
}

/// Splits at the score heading, parses the draft into blocks and the tail into a score card.
pub fn parse_scored(text: &str) -> Scored {
    let Some(delim) = SCORE_DELIMITER.find(text) else {
        return Scored { draft: parse_blocks(text, &HeadingGrammar::markdown()), card: ScoreCard::unavailable() };
    };
    let draft = parse_blocks(&text[..delim.start()], &HeadingGrammar::markdown());
    let section = text[delim.end()..].trim().to_string();
    Scored { draft, card: score_card(section) }
}

fn score_card(section: String) -> ScoreCard {
    let hit = SCORE.captures(&section).or_else(|| BARE_SCORE.captures(&section));
    let (score, after) = match hit {
        Some(caps) => {
            let digits = &caps[1];
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            match digits.parse::<u16>() {
                Ok(v) if v <= 100 => (v.to_string(), Some(whole)),
                _ => (NOT_AVAILABLE.to_string(), Some(whole)),
            }
        }
        None => (NOT_AVAILABLE.to_string(), None),
    };

    let rationale = match RATIONALE.find(&section) {
        Some(m) => tidy(&section[m.end()..]),
        None => after.map(|end| tidy(&section[end..])).unwrap_or_default(),
    };
    let rationale = if rationale.is_empty() { NOT_AVAILABLE.to_string() } else { rationale };

    ScoreCard { section, score, rationale }
}

fn tidy(s: &str) -> String {
    s.trim_start_matches(|c: char| c == '*' || c == ':' || c == '：' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '*' || c.is_whitespace())
        .to_string()
}

/// ========================================
/// Dispatch
/// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Items(ItemKind),
    Blocks,
    Scored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Parsed {
    Items { items: Vec<Item> },
    Blocks { sections: Sections },
    Scored(Scored),
}

pub fn parse_response(mode: Mode, raw: &str) -> Parsed {
    match mode {
        Mode::Items(kind) => Parsed::Items { items: parse_items(raw, kind) },
        Mode::Blocks => Parsed::Blocks { sections: parse_blocks(raw, &HeadingGrammar::markdown()) },
        Mode::Scored => Parsed::Scored(parse_scored(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_by_heading() {
        let text = "intro\n### 1. 課題\nfoo\n\n### 2. 顧客セグメント（初期）\n  bar  \n";
        let s = parse_blocks(text, &HeadingGrammar::markdown());
        assert_eq!(s.headings(), vec!["課題", "顧客セグメント"]);
        assert_eq!(s.get("課題"), Some("foo"));
        assert_eq!(s.get("顧客セグメント"), Some("  bar"));
        assert_eq!(s.preamble, "intro");
    }

    #[test]
    fn test_blocks_tolerate_order_and_gaps() {
        let s = parse_blocks("## 脅威\nx\n## 強み\ny", &HeadingGrammar::markdown());
        assert_eq!(s.get("強み"), Some("y"));
        assert_eq!(s.get("弱み"), None);
    }

    #[test]
    fn test_no_heading_is_unparsed() {
        let s = parse_blocks("  just prose\nmore  ", &HeadingGrammar::markdown());
        assert!(s.is_unparsed());
        assert_eq!(s.get(UNPARSED), Some("  just prose\nmore"));

        let empty = parse_blocks("", &HeadingGrammar::markdown());
        assert_eq!(empty.get(UNPARSED), Some(""));
    }

    #[test]
    fn test_duplicate_headings_merge() {
        let s = parse_blocks("## A\none\n## A\ntwo", &HeadingGrammar::markdown());
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("A"), Some("one\n\ntwo"));
    }

    #[test]
    fn test_blocks_idempotent() {
        let inputs = [
            "### 1. 課題\nfoo\n### 2. 顧客セグメント (B2B)\nbar\n### 2. 顧客セグメント\nbaz",
            "pre\n## **強み**:\n- a\n- b\n## 弱み\n",
            "no structure at all",
            "",
            "### ()\nbody",
            "### A\n    ### B\nx",
            "    ### x",
            "\n\n  indented first\nsecond  \n\n",
            "intro\n### unparsed\nfoo",
            "### C# :\nbody",
            "### Title # :\nbody\n### Closed ##\nmore",
        ];
        for text in inputs {
            let once = parse_blocks(text, &HeadingGrammar::markdown());
            let twice = parse_blocks(&once.to_markdown(), &HeadingGrammar::markdown());
            assert_eq!(once, twice, "{text:?}");
        }
    }

    #[test]
    fn test_clean_heading() {
        assert_eq!(clean_heading("6. 差別化ポイント・優位性（Moat含む）"), "差別化ポイント・優位性");
        assert_eq!(clean_heading("**1. 課題**:"), "課題");
        assert_eq!(clean_heading("3C分析 (概要)"), "3C分析");
        assert_eq!(clean_heading("()"), "()");
    }

    #[test]
    fn test_custom_grammar() {
        let grammar = HeadingGrammar::new(Regex::new(r"^【(?P<name>[^】]+)】$").unwrap());
        let s = parse_blocks("【市場】\n大きい\n【競合】\n少ない", &grammar);
        assert_eq!(s.get("市場"), Some("大きい"));
        assert_eq!(s.get("競合"), Some("少ない"));
    }

    #[test]
    fn test_target_items() {
        let items = parse_items("**ターゲット案1: X**\n* 根拠: Y", ItemKind::Targets);
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["**ターゲット案1: X**"]);
        assert_eq!(items[0].name, "ターゲット案1");
        assert_eq!(items[0].content, "* 根拠: Y");
    }

    #[test]
    fn test_items_without_content_are_dropped() {
        let text = "前置き\n**課題1: A**\n\n**課題2: B**\n- 詳細\n\n- 続き";
        let items = parse_items(text, ItemKind::Problems);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "課題2");
        assert_eq!(items[0].content, "- 詳細\n- 続き");
    }

    #[test]
    fn test_story_items_with_space_in_label() {
        let items = parse_items("**ストーリー案 2:**\n* 顧客: 工場", ItemKind::Stories);
        assert_eq!(items[0].name, "ストーリー案2");
    }

    #[test]
    fn test_items_on_unstructured_text() {
        assert!(parse_items("nothing here", ItemKind::Moats).is_empty());
        assert!(parse_items("", ItemKind::Targets).is_empty());
    }

    #[test]
    fn test_score_with_trailing_rationale() {
        let s = parse_scored("### 総評\n良い\n## 品質スコア\n**スコア: 87/100** 市場が明確で検証計画も具体的。");
        assert_eq!(s.card.score, "87");
        assert_eq!(s.card.value(), Some(87));
        assert_eq!(s.card.rationale, "市場が明確で検証計画も具体的。");
        assert_eq!(s.draft.get("総評"), Some("良い"));
    }

    #[test]
    fn test_no_delimiter_is_not_available() {
        let s = parse_scored("### 課題\nfoo");
        assert_eq!(s.card.score, NOT_AVAILABLE);
        assert_eq!(s.card.rationale, NOT_AVAILABLE);
        assert_eq!(s.draft.get("課題"), Some("foo"));

        let empty = parse_scored("");
        assert_eq!(empty.card.score, NOT_AVAILABLE);
        assert!(empty.draft.is_unparsed());
    }

    #[test]
    fn test_lean_canvas_scored() {
        let raw = "### 1. 課題\nfoo\n### 2. 顧客セグメント\nbar\n## 品質スコア\n**スコア:** 70/100\n**根拠:** ok";
        let s = parse_scored(raw);
        assert_eq!(s.draft.headings(), vec!["課題", "顧客セグメント"]);
        assert_eq!(s.draft.get("課題"), Some("foo"));
        assert_eq!(s.draft.get("顧客セグメント"), Some("bar"));
        assert!(s.card.section.contains("70/100"));
        assert_eq!(s.card.rationale, "ok");
        assert_eq!(s.card.display(), "70/100");
    }

    #[test]
    fn test_out_of_range_score() {
        let s = parse_scored("## スコア\nスコア: 150/100\n根拠: 盛りすぎ");
        assert_eq!(s.card.score, NOT_AVAILABLE);
        assert_eq!(s.card.rationale, "盛りすぎ");
    }

    #[test]
    fn test_delimiter_without_score() {
        let s = parse_scored("## 品質スコア\n評価できませんでした");
        assert_eq!(s.card.score, NOT_AVAILABLE);
        assert_eq!(s.card.rationale, NOT_AVAILABLE);
        assert_eq!(s.card.section, "評価できませんでした");
    }

    #[test]
    fn test_indented_heading_stays_body() {
        let once = parse_blocks("### A\n    ### B\nx", &HeadingGrammar::markdown());
        assert_eq!(once.headings(), vec!["A"]);
        assert_eq!(once.get("A"), Some("    ### B\nx"));
        assert_eq!(once.to_markdown(), "### A\n    ### B\nx\n\n");
    }

    #[test]
    fn test_closing_hashes() {
        let s = parse_blocks("## 強み ##\na\n## C#\nb", &HeadingGrammar::markdown());
        assert_eq!(s.headings(), vec!["強み", "C#"]);
    }

    #[test]
    fn test_scored_idempotent() {
        let inputs = [
            "### 課題\nfoo\n## 品質スコア\n**スコア:** 70/100\n**根拠:** ok",
            "前置き\n### 課題\n    ### 字下げ\n## 評価スコア\n**スコア: 87/100** 良い",
            "### 1. スコア\n内訳\n## 品質スコア\nスコア: 50/100",
            "no delimiter",
            "",
        ];
        for text in inputs {
            let once = parse_scored(text);
            let twice = parse_scored(&once.to_markdown());
            assert_eq!(once, twice, "{text:?}");
        }
    }
}

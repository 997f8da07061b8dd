use crate::session::{Pick, Session, Task, TechSummary, Topic, PITCH_NOTE_TOPICS};

/// Substituted for any upstream value that is missing or whose generation failed.
pub const NO_INFORMATION: &str = "情報なし";
/// Substituted when research was not gathered or returned nothing.
pub const NO_SEARCH_RESULTS: &str = "検索結果なし";

fn persona() -> &'static str {
r#"あなたは技術シーズの事業化を支援する経験豊富な事業開発コンサルタントです。
提供された情報を最大限に活用し、不足している点は一般的な知見から論理的に補完してください。
推測で補った内容は「（推測）」と明記してください。"#
}

fn format_rules() -> &'static str {
r#"出力ルール:
- 指定された見出しを、指定された順番と表記のまま使用してください。
- 見出し以外の前置きや締めの挨拶は書かないでください。
- マークダウン形式で、各項目は簡潔な箇条書きを基本としてください。"#
}

fn score_rules(subject: &str) -> String {
    format!(
        r#"最後に必ず次の形式で{subject}の品質を自己評価してください:

## 品質スコア
**スコア:** [0〜100の整数]/100
**根拠:** [スコアの根拠を1〜2文で]"#
    )
}

/// ========================================
/// Context accessors
/// ========================================

fn tech(session: &Session) -> String {
    session
        .tech_summary()
        .map(TechSummary::render)
        .unwrap_or_else(|| NO_INFORMATION.to_string())
}

fn selection(session: &Session, pick: Pick) -> String {
    match session.selection(pick) {
        Some(items) if !items.is_empty() => items
            .iter()
            .map(|i| format!("■ {}\n{}", i.name, i.content))
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => NO_INFORMATION.to_string(),
    }
}

fn generated(session: &Session, task: Task) -> String {
    session
        .result(task)
        .and_then(|r| r.context_text())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NO_INFORMATION.to_string())
}

fn pitch_notes(session: &Session) -> String {
    let notes = session.pitch_notes();
    PITCH_NOTE_TOPICS
        .iter()
        .map(|topic| {
            let note = notes.and_then(|n| n.get(topic)).unwrap_or(NO_INFORMATION);
            format!("- {topic}: {note}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn research(session: &Session, topic: Topic) -> String {
    match session.research(topic) {
        Some(r) if !r.hits.is_empty() => r
            .hits
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}. {}\n   {}\n   出典: {}", i + 1, h.title, h.snippet, h.url))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => NO_SEARCH_RESULTS.to_string(),
    }
}

/// Search query used to gather research for `topic`, derived from the session.
pub fn research_query(topic: Topic, session: &Session) -> String {
    let Some(summary) = session.tech_summary() else {
        return String::new();
    };
    match topic {
        Topic::Market => format!("{} 市場規模 動向 {}", summary.areas, summary.name),
        Topic::Competitors => {
            let targets = session
                .selection(Pick::Targets)
                .map(|items| {
                    items.iter().map(|i| i.name.as_str()).collect::<Vec<_>>().join(" ")
                })
                .unwrap_or_default();
            format!("{} 競合 代替技術 {} {}", summary.name, summary.areas, targets)
                .trim()
                .to_string()
        }
    }
}

/// ========================================
/// Builders
/// ========================================

/// Builds the prompt for `task` from the current session contents. Pure.
pub fn build_prompt(task: Task, session: &Session) -> String {
    match task {
        Task::TargetStrategy => target_strategy(session),
        Task::ProblemList => problem_list(session),
        Task::StoryProposals => story_proposals(session),
        Task::ValueProposition => value_proposition(session),
        Task::LeanCanvas => lean_canvas(session),
        Task::Mvp => analysis(session, task, &["MVPの定義", "主要機能", "検証すべき仮説", "検証方法", "成功基準"]),
        Task::Swot => analysis(session, task, &["強み", "弱み", "機会", "脅威", "戦略示唆"]),
        Task::FourP => analysis(session, task, &["製品", "価格", "流通", "販促"]),
        Task::ThreeC => analysis(session, task, &["顧客", "競合", "自社", "示唆"]),
        Task::Financials => analysis(
            session,
            task,
            &["売上モデル", "コスト構造", "3年間の収支見通し", "必要資金", "前提条件"],
        ),
        Task::CompetitorAnalysis => competitor_analysis(session),
        Task::MoatProposals => moat_proposals(session),
        Task::PitchDeck => pitch_deck(session),
        Task::InvestorReview => investor_review(session),
    }
}

fn numbered_headings(headings: &[&str]) -> String {
    headings
        .iter()
        .enumerate()
        .map(|(i, h)| format!("### {}. {}", i + 1, h))
        .collect::<Vec<_>>()
        .join("\n")
}

fn target_strategy(session: &Session) -> String {
    format!(
        r#"{persona}

# 技術概要:
{tech}

# 市場調査（Web検索結果）:
{research}

上記の技術が最も価値を発揮できるターゲット市場（顧客セグメント）の候補を3つ提案してください。
各候補は必ず以下の形式で記述してください。

**ターゲット案1: [顧客セグメント名]**
* 根拠: [この技術が適合する理由]
* 市場規模感: [規模感と成長性]
* 参入難易度: [高/中/低とその理由]

**ターゲット案2: [顧客セグメント名]**
（同じ形式）

**ターゲット案3: [顧客セグメント名]**
（同じ形式）

{rules}"#,
        persona = persona(),
        tech = tech(session),
        research = research(session, Topic::Market),
        rules = format_rules(),
    )
}

fn problem_list(session: &Session) -> String {
    format!(
        r#"{persona}

# 技術概要:
{tech}

# 選択されたターゲット:
{targets}

選択されたターゲット顧客が抱えている課題（ペイン）を重要度の高い順に5つ挙げてください。
各課題は必ず以下の形式で記述してください。

**課題1: [課題の要約]**
* 詳細: [具体的な状況]
* 深刻度: [高/中/低とその理由]
* 技術との関係: [この技術で解決できる点]

（課題2〜課題5も同じ形式）

{rules}"#,
        persona = persona(),
        tech = tech(session),
        targets = selection(session, Pick::Targets),
        rules = format_rules(),
    )
}

fn story_proposals(session: &Session) -> String {
    format!(
        r#"{persona}

# 技術概要:
{tech}

# 選択されたターゲット:
{targets}

# 選択された顧客課題:
{problems}

上記の技術概要、ターゲット、顧客課題を踏まえ、具体的な「事業ストーリー案」を3つ提案してください。
各ストーリー案は、必ず以下の項目立てで、それぞれの内容を具体的に記述してください。

**ストーリー案1:**
* **顧客（ターゲット）:** [具体的な顧客像やセグメント]
* **課題:** [ターゲット顧客が抱えている具体的な課題・ペイン]
* **この技術による解決法:** [あなたの技術がその課題をどのように解決するか]
* **この技術が与える価値:** [解決によって顧客が得られる具体的な価値・メリット]
* **選択優位性:** [競合と比較して、なぜこの技術・アプローチが選ばれるのか]

**ストーリー案2:**
（同じ形式）

**ストーリー案3:**
（同じ形式）

{rules}"#,
        persona = persona(),
        tech = tech(session),
        targets = selection(session, Pick::Targets),
        problems = selection(session, Pick::Problems),
        rules = format_rules(),
    )
}

fn value_proposition(session: &Session) -> String {
    format!(
        r#"{persona}

# 技術概要:
{tech}

# 選択されたターゲット:
{targets}

# 選択された顧客課題:
{problems}

# 選抜された事業ストーリー:
{stories}

上記を元に、バリュープロポジションキャンバスを作成してください。
以下の見出しをこの順番で使用してください。

{headings}

{rules}"#,
        persona = persona(),
        tech = tech(session),
        targets = selection(session, Pick::Targets),
        problems = selection(session, Pick::Problems),
        stories = selection(session, Pick::Stories),
        headings = numbered_headings(&[
            "顧客の仕事",
            "ペイン",
            "ゲイン",
            "製品・サービス",
            "ペインリリーバー",
            "ゲインクリエイター",
        ]),
        rules = format_rules(),
    )
}

fn lean_canvas(session: &Session) -> String {
    format!(
        r#"{persona}

# 技術概要:
{tech}

# 選択されたターゲット:
{targets}

# 選択された顧客課題:
{problems}

# 選抜された事業ストーリー:
{stories}

# バリュープロポジションキャンバス:
{vpc}

上記を元に、リーンキャンバスを作成してください。
以下の見出しをこの順番で使用してください。

{headings}

{score}

{rules}"#,
        persona = persona(),
        tech = tech(session),
        targets = selection(session, Pick::Targets),
        problems = selection(session, Pick::Problems),
        stories = selection(session, Pick::Stories),
        vpc = generated(session, Task::ValueProposition),
        headings = numbered_headings(&[
            "課題",
            "顧客セグメント",
            "独自の価値提案",
            "ソリューション",
            "チャネル",
            "収益の流れ",
            "コスト構造",
            "主要指標",
            "圧倒的な優位性",
        ]),
        score = score_rules("リーンキャンバス"),
        rules = format_rules(),
    )
}

fn analysis(session: &Session, task: Task, headings: &[&str]) -> String {
    format!(
        r#"{persona}

# 技術概要:
{tech}

# 選択されたターゲット:
{targets}

# リーンキャンバス:
{lean}

上記の事業仮説について「{label}」を行ってください。
以下の見出しをこの順番で使用してください。

{headings}

{rules}"#,
        persona = persona(),
        tech = tech(session),
        targets = selection(session, Pick::Targets),
        lean = generated(session, Task::LeanCanvas),
        label = task.label(),
        headings = numbered_headings(headings),
        rules = format_rules(),
    )
}

fn competitor_analysis(session: &Session) -> String {
    format!(
        r#"{persona}

# 技術概要:
{tech}

# 選択されたターゲット:
{targets}

# リーンキャンバス:
{lean}

# 競合調査（Web検索結果）:
{research}

上記を元に競合分析を行ってください。検索結果に根拠がない企業名は「（推測）」と明記してください。
以下の見出しをこの順番で使用してください。

{headings}

{rules}"#,
        persona = persona(),
        tech = tech(session),
        targets = selection(session, Pick::Targets),
        lean = generated(session, Task::LeanCanvas),
        research = research(session, Topic::Competitors),
        headings = numbered_headings(&["主要競合", "代替手段", "比較表", "差別化ポイント"]),
        rules = format_rules(),
    )
}

fn moat_proposals(session: &Session) -> String {
    format!(
        r#"{persona}

# 技術概要:
{tech}

# リーンキャンバス:
{lean}

# 競合分析:
{competitors}

上記を踏まえ、この事業が築ける持続的な競争優位性（モート）の候補を3〜5つ提案してください。
各候補は必ず以下の形式で記述してください。

**モート案1: [モートの名称]**
* 種類: [ネットワーク効果/スイッチングコスト/知財/データ/規模の経済 など]
* 構築方法: [どのように築くか]
* 模倣困難性: [競合がなぜ真似できないか]

（モート案2以降も同じ形式）

{rules}"#,
        persona = persona(),
        tech = tech(session),
        lean = generated(session, Task::LeanCanvas),
        competitors = generated(session, Task::CompetitorAnalysis),
        rules = format_rules(),
    )
}

fn pitch_deck(session: &Session) -> String {
    let analyses = [Task::Mvp, Task::Swot, Task::FourP, Task::ThreeC, Task::Financials]
        .into_iter()
        .map(|t| format!("## {}\n{}", t.label(), generated(session, t)))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        r#"{persona}
あなたはピッチ資料作成の専門家でもあります。

# 技術概要:
{tech}

# 選択されたターゲット:
{targets}

# 選択された顧客課題:
{problems}

# 選抜された事業ストーリー:
{stories}

# バリュープロポジションキャンバス:
{vpc}

# リーンキャンバス:
{lean}

# 深掘り分析:
{analyses}

# 競合分析:
{competitors}

# 選択されたモート:
{moats}

# ユーザーからの補足情報:
{notes}

上記すべてを統合し、投資家向けピッチ資料の骨子を作成してください。
ユーザーからの補足情報がある項目は、その内容を最大限活用してください。
「チーム」など事実に基づく情報が不足する項目は「ユーザーによる記述が必要」と明記してください。
以下の見出しをこの順番で使用してください。

{headings}

{score}

{rules}"#,
        persona = persona(),
        tech = tech(session),
        targets = selection(session, Pick::Targets),
        problems = selection(session, Pick::Problems),
        stories = selection(session, Pick::Stories),
        vpc = generated(session, Task::ValueProposition),
        lean = generated(session, Task::LeanCanvas),
        analyses = analyses,
        competitors = generated(session, Task::CompetitorAnalysis),
        moats = selection(session, Pick::Moats),
        notes = pitch_notes(session),
        headings = numbered_headings(&PITCH_SECTIONS),
        score = score_rules("ピッチ資料"),
        rules = format_rules(),
    )
}

const PITCH_SECTIONS: [&str; 11] = [
    "タイトル",
    "顧客の課題",
    "解決策",
    "市場規模",
    "競合",
    "差別化ポイント・優位性（Moat含む）",
    "ビジネスモデル",
    "なぜ今か",
    "なぜ自分（この会社）か",
    "事業計画の骨子（3年）",
    "収支計画の概算（3年）",
];

fn investor_review(session: &Session) -> String {
    format!(
        r#"あなたは、革新的な技術シーズの事業化可能性を評価する、経験豊富で厳しい視点を持つベンチャーキャピタリスト（VC）です。
ビジネスとしての「儲かるか」「スケールするか」「持続可能か」という観点を最も重視します。

# 技術概要:
{tech}

# 評価対象のピッチ資料:
---
{pitch}
---

上記のピッチ資料をVCの視点から厳しく評価してください。
以下の見出しをこの順番で使用してください。

### 1. 総評
### 2. 課題リスト
[特に問題となる点・リスク・深掘りが必要な点と、それがなぜ問題なのか]
### 3. Next Actionリスト
[優先度順。各アクションが「LLMに手伝ってもらえること」か「研究者自身が行う必要があること」かを明記]

最後に必ず次の形式で事業としての魅力度を評価してください:

## 評価スコア
**スコア:** [0〜100の整数]/100
**根拠:** [スコアの主な根拠を1〜2文で]

{rules}"#,
        tech = tech(session),
        pitch = generated(session, Task::PitchDeck),
        rules = format_rules(),
    )
}

/// Single-shot pitch outline built from the technology summary alone.
pub fn quick_pitch_prompt(summary: &TechSummary) -> String {
    format!(
        r#"{persona}
提供された「技術概要」のみを元に、以下の11項目から成る事業ピッチ資料の骨子を作成してください。
各項目について、市場調査、競合分析、ビジネスモデル検討、SWOT分析などの観点を内部的に考慮し、主要なポイントを簡潔な箇条書き中心で記述してください。
Web検索機能は利用できません。具体的な数値が不明な場合はその旨と、調査すべき点を記載してください。

# 技術概要:
{tech}

# 作成するピッチ資料の構成項目:
{headings}

{rules}"#,
        persona = persona(),
        tech = summary.render(),
        headings = numbered_headings(&PITCH_SECTIONS),
        rules = format_rules(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchHit;
    use crate::session::{PitchNotes, ResearchResult, SelectedItem, Slot, SlotValue, StepResult, TechInput};

    fn session_with_summary() -> Session {
        let mut s = Session::new();
        let summary = TechSummary::from_input(&TechInput {
            name: "Foo".into(),
            problem: "Bar".into(),
            features: "Baz".into(),
            areas: "Widgets".into(),
            supplement: String::new(),
        })
        .unwrap();
        s.put(Slot::TechSummary, SlotValue::Summary(summary));
        s
    }

    #[test]
    fn test_target_prompt_contains_all_input_values() {
        let s = session_with_summary();
        let p = build_prompt(Task::TargetStrategy, &s);
        for literal in ["Foo", "Bar", "Baz", "Widgets"] {
            assert!(p.contains(literal), "missing {literal}");
        }
        assert!(p.contains(NO_SEARCH_RESULTS));
        assert!(p.contains("**ターゲット案1:"));
    }

    #[test]
    fn test_missing_upstream_uses_placeholder() {
        let s = session_with_summary();
        let p = build_prompt(Task::LeanCanvas, &s);
        // targets, problems and the canvas are all absent
        assert!(p.matches(NO_INFORMATION).count() >= 3);
        assert!(p.contains("## 品質スコア"));

        let empty = Session::new();
        assert!(build_prompt(Task::TargetStrategy, &empty).contains(NO_INFORMATION));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let s = session_with_summary();
        for task in Task::ALL {
            assert_eq!(build_prompt(task, &s), build_prompt(task, &s));
        }
    }

    #[test]
    fn test_edits_flow_into_downstream_prompt() {
        let mut s = session_with_summary();
        s.put(
            Slot::Generated(Task::ValueProposition),
            SlotValue::Generated(StepResult::parsed(Task::ValueProposition, "### 1. ペイン\n元の文章")),
        );
        s.edit(&crate::session::FieldKey::new(Task::ValueProposition, "ペイン"), "編集後の文章".into())
            .unwrap();
        let p = build_prompt(Task::LeanCanvas, &s);
        assert!(p.contains("編集後の文章"));
        assert!(!p.contains("元の文章"));
    }

    #[test]
    fn test_selection_and_research_rendered() {
        let mut s = session_with_summary();
        s.put(
            Slot::Research(Topic::Market),
            SlotValue::Research(ResearchResult {
                query: "q".into(),
                hits: vec![SearchHit {
                    title: "市場レポート".into(),
                    snippet: "年率10%成長".into(),
                    url: "https://example.com/r".into(),
                }],
                note: None,
            }),
        );
        let p = build_prompt(Task::TargetStrategy, &s);
        assert!(p.contains("市場レポート"));
        assert!(p.contains("https://example.com/r"));

        s.put(
            Slot::Selection(Pick::Targets),
            SlotValue::Selected(vec![SelectedItem { name: "ターゲット案2".into(), content: "中小工場".into() }]),
        );
        let p = build_prompt(Task::ProblemList, &s);
        assert!(p.contains("■ ターゲット案2\n中小工場"));
    }

    #[test]
    fn test_failed_upstream_is_placeholder() {
        let mut s = session_with_summary();
        let err = crate::errors::GenerationError::EmptyResponse { provider: "gemini" };
        s.put(Slot::Generated(Task::PitchDeck), SlotValue::Generated(StepResult::failed(Task::PitchDeck, &err)));
        let p = build_prompt(Task::InvestorReview, &s);
        assert!(p.contains(NO_INFORMATION));
        assert!(!p.contains(crate::session::GENERATION_FAILED));
    }

    #[test]
    fn test_story_prompt_and_selected_stories_downstream() {
        let mut s = session_with_summary();
        let p = build_prompt(Task::StoryProposals, &s);
        assert!(p.contains("**ストーリー案1:**"));
        assert!(p.contains("選択優位性"));

        s.put(
            Slot::Selection(Pick::Stories),
            SlotValue::Selected(vec![SelectedItem { name: "ストーリー案3".into(), content: "検査を自動化する".into() }]),
        );
        for task in [Task::ValueProposition, Task::LeanCanvas, Task::PitchDeck] {
            assert!(build_prompt(task, &s).contains("■ ストーリー案3\n検査を自動化する"), "{task}");
        }
    }

    #[test]
    fn test_pitch_notes_fill_every_topic() {
        let mut s = session_with_summary();
        let p = build_prompt(Task::PitchDeck, &s);
        assert!(p.contains("# ユーザーからの補足情報:\n- 顧客の課題: 情報なし"));
        assert!(p.contains("- 収支計画メモ: 情報なし"));

        let notes = PitchNotes::new([("なぜ今か", "規制緩和が進んだ")]).unwrap();
        s.put(Slot::PitchNotes, SlotValue::Notes(notes));
        let p = build_prompt(Task::PitchDeck, &s);
        assert!(p.contains("- なぜ今か: 規制緩和が進んだ"));
        assert!(p.contains("- 競合: 情報なし"));
    }

    #[test]
    fn test_research_query() {
        let s = session_with_summary();
        assert_eq!(research_query(Topic::Market, &s), "Widgets 市場規模 動向 Foo");
        assert_eq!(research_query(Topic::Market, &Session::new()), "");
        assert!(research_query(Topic::Competitors, &s).starts_with("Foo 競合"));
    }

    #[test]
    fn test_quick_pitch_lists_eleven_sections() {
        let s = session_with_summary();
        let p = quick_pitch_prompt(s.tech_summary().unwrap());
        assert!(p.contains("### 1. タイトル"));
        assert!(p.contains("### 11. 収支計画の概算（3年）"));
    }
}

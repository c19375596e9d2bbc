// All LLM prompt constants for the analysis passes.
// Reuses the persona fragments from llm_client::prompts.
//
// Every critique conversation has the same four turns:
//   system: editor persona for the target publication
//   user: title plus the text under review (whole story or one scene)
//   assistant: acknowledgement asking what to focus on
//   user: the pass rubric

use crate::analysis::passes::{AnalysisPass, Scope};
use crate::llm_client::prompts::SEGMENTATION_PERSONA;
use crate::llm_client::{Conversation, Turn};

/// Whole-manuscript submission. Replace `{title}` and `{text}` before sending.
pub const MANUSCRIPT_SUBMISSION_TEMPLATE: &str =
    "老师您好。下面是我写的短篇小说《{title}》的全文：\n\n\n{text}";

/// Single-scene submission. Replace `{title}` and `{text}` before sending.
pub const SCENE_SUBMISSION_TEMPLATE: &str =
    "老师您好，我的小说题目是《{title}》。下面是小说中的一个场景：\n\n\n{text}";

pub const MANUSCRIPT_ACK: &str = "收到，我会认真读完。关于这篇小说，你最想听哪方面的意见？";

pub const SCENE_ACK: &str = "收到，我会认真读完。关于这个场景，你最想听哪方面的意见？";

pub const CRITICAL_RUBRIC: &str = "\
我最关心这篇小说最严重的问题。请老师直说：这篇小说里最致命的一个缺陷是什么？";

pub const CORE_RUBRIC: &str = "\
我想请老师从整体上诊断这篇小说的核心问题：
1. 故事的核心概念或主题是否清晰、有力量？
2. 整体读感如何？节奏是拖沓还是仓促？情绪是否连贯？
3. 开头能否立刻抓住读者？结尾是否令人满意、余味悠长，是否与开头和主题形成呼应？
4. 主角的目标、动机与冲突是否明确，并且贯穿始终？
5. 故事主线是否清晰？有没有逻辑断裂或突兀的转折？";

pub const PLOT_RHYTHM_RUBRIC: &str = "\
我想请老师点评这篇小说的情节结构与节奏：
1. 情节骨架是否完整？能否清楚地梳理出“开端（建立期待、引出主角、触发事件）→ 发展（冲突升级、尝试解决、受挫、转折）→ 高潮（最大冲突、决战或抉择）→ 结局（解决、后果、新的常态）”这条脉络？
2. 节奏把控如何？哪些部分推进太慢（信息冗余、描写过多、枝节情节）？哪些部分太快（关键情感或转折没有展开）？高潮是否有足够分量？结局是否仓促？
3. 情节是否由冲突驱动？每个场景是否都有明确的外部或内部冲突在推动？冲突是否合理地逐步升级？
4. 情节能否保持悬念与张力，让读者一直想知道接下来会发生什么？转折点是否有效？";

pub const CHARACTER_RUBRIC: &str = "\
我想请老师点评这篇小说的人物弧光：
1. 主角是否经历了有意义的成长或转变？这种转变是否可信，动机是否充分？
2. 主要配角是否立体？他们的存在是否服务于主角的成长或情节的推进？他们的动机是否清晰？
3. 人物关系的发展是否自然、是否有张力？";

pub const THEME_RUBRIC: &str = "\
我想请老师点评这篇小说的主题：
1. 故事想要表达的核心思想是什么？它是否贯穿始终，是否通过情节和人物自然地呈现出来，而不是生硬说教？
2. 结局是否强化了这个主题，或者对它做出了反思？";

pub const SCENE_VALIDITY_RUBRIC: &str = "\
我想请老师点评这个场景是否成立：
1. 场景是否有明确的目的？（例如展现人物性格、推进情节、制造冲突、揭示信息、营造氛围）
2. 场景是否遵循“目标 → 冲突 → 挫折或结果”的基本结构？
3. 场景的开头和结尾是否有力？能否自然地过渡到下一个场景？
4. 场景的视角是否清晰一致？（如果是单一视角，有没有越界）";

pub const SHOW_AND_TELL_RUBRIC: &str = "\
我想请老师点评这个场景中“展示”与“讲述”的运用：
1. 是否有大段本该展示却用了讲述的地方？
2. 关键的情感和信息是否通过人物的行动、对话和感官细节展示出来？";

pub const DIALOGUE_RUBRIC: &str = "\
我想请老师点评这个场景中的对话：
1. 对话是否推动了情节或揭示了人物性格？有没有无效的闲聊？
2. 对话是否符合人物的身份、性格和所处情境？每个人说话的方式是否有区分度？
3. 对话是否自然流畅？有没有书面腔，或者一股脑地倾倒信息？
4. 对话标签（“他说”“她问道”等）是否清晰简洁？能否适当用动作描写代替标签？";

/// Segmentation instructions with a worked example of the expected schema.
pub const SEGMENTATION_INSTRUCTIONS: &str = r#"请按照下面的格式输出场景列表：
{"total": 2, "scenes": [{"scene": 1, "summary": "场景 1 的概要", "paragraphs_start": 1, "paragraphs_end": 4}, {"scene": 2, "summary": "场景 2 的概要", "paragraphs_start": 5, "paragraphs_end": 7}]}
这个例子表示：一共有 2 个场景，第 1 个场景包含第 1 至第 4 自然段，第 2 个场景包含第 5 至第 7 自然段。
场景之间不能重叠，按顺序排列，并且要覆盖全部自然段。"#;

/// Segmentation submission. Replace `{title}` and `{text}` before sending.
pub const SEGMENTATION_SUBMISSION_TEMPLATE: &str =
    "下面是我写的短篇小说《{title}》的全文，每个自然段开头【】中的数字是该段的编号：\n\n\n{text}";

/// The rubric (final user turn) for a pass.
pub fn rubric(pass: AnalysisPass) -> &'static str {
    match pass {
        AnalysisPass::Critical => CRITICAL_RUBRIC,
        AnalysisPass::Core => CORE_RUBRIC,
        AnalysisPass::PlotRhythm => PLOT_RHYTHM_RUBRIC,
        AnalysisPass::Character => CHARACTER_RUBRIC,
        AnalysisPass::Theme => THEME_RUBRIC,
        AnalysisPass::SceneValidity => SCENE_VALIDITY_RUBRIC,
        AnalysisPass::ShowAndTell => SHOW_AND_TELL_RUBRIC,
        AnalysisPass::Dialogue => DIALOGUE_RUBRIC,
    }
}

/// Builds the four-turn critique conversation for `pass`.
///
/// `persona` is the full system turn (see `editor_persona`); `scope_text` is the
/// whole manuscript for whole-manuscript passes and only the scene's paragraphs
/// for scene passes.
pub fn critique_conversation(
    pass: AnalysisPass,
    persona: &str,
    title: &str,
    scope_text: &str,
) -> Conversation {
    let (template, ack) = match pass.scope() {
        Scope::WholeManuscript => (MANUSCRIPT_SUBMISSION_TEMPLATE, MANUSCRIPT_ACK),
        Scope::Scene => (SCENE_SUBMISSION_TEMPLATE, SCENE_ACK),
    };
    let submission = template
        .replace("{title}", title)
        .replace("{text}", scope_text);

    Conversation::new(vec![
        Turn::system(persona),
        Turn::user(submission),
        Turn::assistant(ack),
        Turn::user(rubric(pass)),
    ])
}

/// Builds the two-turn segmentation conversation over numbered paragraphs.
pub fn segmentation_conversation(title: &str, numbered_text: &str) -> Conversation {
    let submission = SEGMENTATION_SUBMISSION_TEMPLATE
        .replace("{title}", title)
        .replace("{text}", numbered_text);

    Conversation::new(vec![
        Turn::system(format!("{SEGMENTATION_PERSONA}\n{SEGMENTATION_INSTRUCTIONS}")),
        Turn::user(submission),
    ])
}

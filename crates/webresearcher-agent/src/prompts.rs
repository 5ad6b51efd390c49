//! System prompts and fixed instructions for every controller.

use webresearcher_core::config::ProtocolKind;
use webresearcher_core::types::ToolDefinition;

fn tools_block(tools: &[ToolDefinition]) -> String {
    tools
        .iter()
        .filter_map(|t| serde_json::to_string(t).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

fn instruction_block(instruction: &str) -> String {
    if instruction.trim().is_empty() {
        String::new()
    } else {
        format!(
            "\n\n# Task-specific Instruction\n{}\n\nThe above instruction is mandatory. Always follow it.",
            instruction.trim()
        )
    }
}

// ─────────────────────────────────────────────
// IterResearch
// ─────────────────────────────────────────────

const RESEARCH_LOOP: &str = r#"**Research Loop:**
You operate in rounds. In each round you are given the original Question, your evolving Report from the previous round (R_{i-1}) and the Observation from your last tool use (O_{i-1}). Nothing else from earlier rounds is kept.

In a single response produce, in this order:

1. `<plan>`: analyse the question, the report and the observation. Is the information sufficient? Are there gaps or contradictions? Decide what to do now.
2. `<report>`: the NEW report R_i. Integrate the observation into the previous report, correct errors and remove redundancy. It fully replaces the previous report and is the only memory carried forward, so it must summarise all findings so far. If the observation was useless, carry the previous report forward.
3. Exactly one action:
   - a tool call when more research is needed,
   - `<answer>` with the final answer when you are done,
   - `<terminate>` when the report already is the final answer.

Write the plan, report and answer in the same language as the question."#;

/// System prompt for the single-agent loop.
pub fn research_system_prompt(
    today: &str,
    tools: &[ToolDefinition],
    protocol: ProtocolKind,
    instruction: &str,
) -> String {
    let action_format = match protocol {
        ProtocolKind::Tagged => format!(
            "**Output Format:**\n<plan>\n...\n</plan>\n<report>\n...\n</report>\n<tool_call>\n{{\"name\": \"tool_name\", \"arguments\": {{\"arg\": \"value\"}}}}\n</tool_call>\n\n\
For the python tool put the code after the JSON inside <code>...</code> tags within the tool call.\n\
Or finish with <answer>...</answer> (or <terminate>reason</terminate>) instead of the tool call.\n\n\
**Available Tools:**\n<tools>\n{}\n</tools>",
            tools_block(tools)
        ),
        ProtocolKind::Function => "**Output Format:**\nWrite <plan>...</plan> and <report>...</report> in your message text, then either call exactly one of the provided functions or finish with <answer>...</answer> (or <terminate>reason</terminate>).".to_string(),
    };

    format!(
        "You are WebResearcher, an iterative deep research agent. Today is {today}. Answer the user's question accurately by searching, reading and synthesising information over several rounds.\n\n{RESEARCH_LOOP}\n\n{action_format}{}",
        instruction_block(instruction)
    )
}

/// Why a final answer is being forced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceReason {
    MaxRounds,
    Timeout,
    Failures,
}

/// Tail message for the extra call that demands an answer now.
pub fn forced_answer_instruction(reason: ForceReason) -> String {
    let why = match reason {
        ForceReason::MaxRounds => "You have reached the maximum allowed number of LLM calls.",
        ForceReason::Timeout => "You have run out of research time.",
        ForceReason::Failures => "Your last responses could not be executed.",
    };
    format!(
        "{why} Do not call any more tools. Based on the report and observations so far, provide the final answer now, \
even if it is incomplete. Use the three-part format: <plan>...</plan> <report>...</report> <answer>...</answer>"
    )
}

// ─────────────────────────────────────────────
// ReAct baseline
// ─────────────────────────────────────────────

/// System prompt for the multi-turn ReAct controller.
pub fn react_system_prompt(today: &str, tools: &[ToolDefinition], instruction: &str) -> String {
    format!(
        "You are a deep research assistant. Today is {today}. Investigate the user's question thoroughly, \
using credible and diverse sources. Think step by step inside <think>...</think> before each action. \
When you have gathered enough information, enclose the entire final answer within <answer></answer> tags.\n\n\
# Tools\n\nYou may call one function per turn. Function signatures are provided within <tools></tools> tags:\n\
<tools>\n{}\n</tools>\n\n\
For each function call, return a JSON object with the function name and arguments within <tool_call></tool_call> tags:\n\
<tool_call>\n{{\"name\": <function-name>, \"arguments\": <args-json-object>}}\n</tool_call>\n\n\
For the python tool put the code after the JSON inside <code>...</code> tags within the tool call. \
Results come back inside <tool_response></tool_response> tags.{}",
        tools_block(tools),
        instruction_block(instruction)
    )
}

/// Sent after a turn that neither called a tool nor answered.
pub const REACT_CONTINUE_PROMPT: &str = "Please continue your analysis or provide the final answer using <answer> tags.";

/// Tail message that ends a ReAct run, echoing the task instruction.
pub fn react_forced_answer_instruction(instruction: &str) -> String {
    let base = "You have reached the limit. Stop tool calls. Provide the final response using <answer> only. \
Do NOT include <tool_call> or <think>.";
    if instruction.trim().is_empty() {
        base.to_string()
    } else {
        format!(
            "{base}\n\nRemember the task-specific instruction and follow it strictly:\n{}",
            instruction.trim()
        )
    }
}

// ─────────────────────────────────────────────
// WebWeaver
// ─────────────────────────────────────────────

pub const EMPTY_OUTLINE: &str = "Outline is empty. Start by searching for information.";
pub const NO_OBSERVATION: &str = "No observation yet.";
pub const WRITER_FIRST_OBSERVATION: &str = "No observation yet. Start by retrieving evidence for the first section.";
pub const LANGUAGE_NOTE: &str = "**Use the SAME LANGUAGE as the [Question] above. Do not translate.**";

pub fn planner_system_prompt(today: &str, tool_names: &[String], instruction: &str) -> String {
    format!(
        r#"You are the Planner Agent of WebWeaver. Today is {today}. Explore the research question and produce a comprehensive, citation-grounded OUTLINE.

Everything your tools find is stored in a Memory Bank, which assigns each piece of evidence a citation id (id_1, id_2, ...). Tool observations show you these ids with short summaries.

Each step you receive the [Question], your [Current Outline] and the [Last Observation]. Respond with a <plan> block followed by exactly one action:

1. <tool_call>{{"name": "tool_name", "arguments": {{...}}}}</tool_call> to gather evidence. Tools: {tools}.
2. <write_outline>...</write_outline> to replace the outline. One section per line; every section must cite at least one existing id, e.g.
   1. Introduction <citation>id_1, id_2</citation>
3. <terminate></terminate> when the outline is complete and fully grounded.

Write the outline in the same language as the question.{instruction}"#,
        tools = tool_names.join(", "),
        instruction = instruction_block(instruction)
    )
}

pub const PLANNER_FINAL_INSTRUCTION: &str = "This is your last step. You MUST now output the final outline in a <write_outline> block, citing only existing ids.";

pub fn writer_system_prompt(today: &str, instruction: &str) -> String {
    format!(
        r#"You are the Writer Agent of WebWeaver. Today is {today}. Write a high-quality report based only on the [Final Outline] and the evidence you retrieve.

Each step you receive the [Question], the [Final Outline], the [Report Written So Far] and the [Last Observation]. Respond with a <plan> block followed by exactly one action:

1. <tool_call>{{"name": "retrieve", "arguments": {{"citation_ids": ["id_1", "id_2"]}}}}</tool_call> to read the evidence for the next section.
2. <write>...</write> with the full text of the next section in outline order. Cite retrieved evidence inline as [cite:id_1]. Only cite ids you have retrieved.
3. <terminate></terminate> once every section has been written.

Write in the same language as the question and the outline.{instruction}"#,
        instruction = instruction_block(instruction)
    )
}

pub const WRITER_FINAL_INSTRUCTION: &str =
    "This is your last step. You MUST now write the next section in a <write> block using the evidence already retrieved.";
pub const WRITE_NOW_HINT: &str =
    "\n\nInstruction: You have gathered sufficient evidence. You MUST now <write> the next section.";

// ─────────────────────────────────────────────
// Test-time scaling
// ─────────────────────────────────────────────

pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a chief researcher. Several researchers investigated the same question independently. \
Compare their answers and reports, resolve contradictions by weighing the evidence, and give the single best answer. \
Respond with <report>...</report> containing your reconciled reasoning and <answer>...</answer> containing the final answer, \
in the same language as the question.";

/// User message listing every successful run for the synthesis call.
pub fn synthesis_user_prompt(question: &str, runs: &[(String, String, String)]) -> String {
    let mut out = format!("[Question]\n{question}\n\n[Parallel Research Results]\n");
    for (i, (termination, prediction, report)) in runs.iter().enumerate() {
        out.push_str(&format!(
            "\n--- Researcher {n} (termination: {termination}) ---\n[Answer]\n{prediction}\n[Report]\n{report}\n",
            n = i + 1
        ));
    }
    out
}

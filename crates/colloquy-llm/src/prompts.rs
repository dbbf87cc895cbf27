//! Prompt assembly for the interview and report stages.
//!
//! Every builder returns a full message list ready for [`LlmClient::chat`].
//! The model plays the asker when generating questions and the responder when
//! generating answers, so the transcript's roles flip between the two.
//!
//! [`LlmClient::chat`]: colloquy_core::traits::LlmClient::chat

use colloquy_core::types::{ChatMessage, ConversationLog, Participant, Speaker};

const QUESTION_SYSTEM: &str = "You are an analyst interviewing an expert to learn about a specific topic.

Aim for insights that are interesting (surprising or non-obvious) and specific (grounded in concrete examples from the expert).

Your persona and goals:
{persona}

Open by introducing yourself with a name that fits your persona, then ask your question.
Keep asking questions that drill down and refine your understanding.
When you are satisfied, end the interview with: \"{termination}\"

Stay in character for the whole interview.";

const ANSWER_SYSTEM: &str = "You are an expert being interviewed by an analyst researching: {topic}.

Answer the interviewer's latest question.

Context you may use:
{context}

Guidelines:
1. Use only the information in the context.
2. Do not introduce outside information or assumptions.
3. Cite sources inline next to the statements they support, e.g. [1].
4. List the cited sources in order at the end of your answer.";

const SEARCH_QUERY_SYSTEM: &str = "You will be given a conversation between an analyst and an expert about: {topic}.

Write one well-structured query for web search that would find material for the expert's next answer.

Analyze the full conversation, paying particular attention to the analyst's final question.
Leave out greetings, names, and pleasantries.

Reply with the query only, on a single line.";

const SECTION_SYSTEM: &str = "You are a technical analyst, writer, and editor.

Write a short, easily digestible report section from an interview and its sources.

Structure (markdown):
## <engaging title based on the analyst's focus>
### Summary
### Sources

Summary guidelines:
- Give background related to the analyst's focus, then emphasize what is novel or surprising.
- Do not mention the names of interviewers or experts.
- Aim for about 400 words.
- Use numbered citations ([1], [2]) that match the Sources list.

Sources guidelines:
- One source per line, no duplicates.

Incorporate editor feedback if provided. Include no preamble before the title.";

const INTRODUCTION_SYSTEM: &str = "You are an analyst, writer, and editor. You will be given a full report.

Write a crisp and compelling introduction for it. Include no preamble.
Use markdown, starting with a # header that titles the whole report.";

const PARTICIPANTS_SYSTEM: &str = "You are creating a panel of AI analyst personas.

1. Review the research topic:
{topic}

2. Review any editorial feedback on the panel:
{feedback}

3. Determine the most interesting themes for this topic.
4. Pick the top {max} themes and assign one analyst to each.

Respond with only a JSON array. Each element must have the string fields
\"name\", \"role\", \"affiliation\", and \"description\".";

/// Placeholder used when there is nothing to ground an answer on.
pub const NO_CONTEXT: &str = "(no additional context)";

/// Render the transcript as chat messages from one side's point of view.
///
/// Turns spoken by `me` become assistant messages; the other side's turns are user messages.
fn transcript_as(log: &ConversationLog, me: Speaker) -> Vec<ChatMessage> {
    log.turns()
        .iter()
        .map(|turn| {
            if turn.speaker == me {
                ChatMessage::assistant(&turn.content)
            } else {
                ChatMessage::user(&turn.content)
            }
        })
        .collect()
}

/// Messages for the asker's next question.
pub fn question_messages(
    opening: &str,
    participant: &Participant,
    log: &ConversationLog,
    termination_phrase: &str,
) -> Vec<ChatMessage> {
    let system = QUESTION_SYSTEM
        .replace("{persona}", &participant.persona())
        .replace("{termination}", termination_phrase);

    let mut messages = vec![ChatMessage::system(system), ChatMessage::user(opening)];
    messages.extend(transcript_as(log, Speaker::Asker));
    messages
}

/// Messages for the responder's answer to the last question in `log`.
pub fn answer_messages(topic: &str, log: &ConversationLog, sources: &[String]) -> Vec<ChatMessage> {
    let system = ANSWER_SYSTEM
        .replace("{topic}", topic)
        .replace("{context}", &format_sources(sources));

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(transcript_as(log, Speaker::Responder));
    messages
}

/// Messages for rewriting the latest question into a search query.
pub fn search_query_messages(topic: &str, log: &ConversationLog) -> Vec<ChatMessage> {
    let system = SEARCH_QUERY_SYSTEM.replace("{topic}", topic);
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Conversation:\n{}", log.transcript())),
    ]
}

/// Messages for writing one report section.
pub fn section_messages(
    participant: &Participant,
    log: &ConversationLog,
    sources: &[String],
    editor_feedback: Option<&str>,
) -> Vec<ChatMessage> {
    let human = format!(
        "Analyst focus:\n{}\n\nInterview transcript:\n{}\n\nSource documents:\n{}\n\nEditor feedback:\n{}",
        participant.description,
        log.transcript(),
        format_sources(sources),
        editor_feedback.unwrap_or("(none)"),
    );
    vec![ChatMessage::system(SECTION_SYSTEM), ChatMessage::user(human)]
}

/// Messages for the introduction to a combined report body.
pub fn introduction_messages(topic: &str, body: &str) -> Vec<ChatMessage> {
    let human = format!(
        "Topic: {}\n\nHere are the sections written from the interviews:\n<sections>\n{}\n</sections>",
        topic, body
    );
    vec![ChatMessage::system(INTRODUCTION_SYSTEM), ChatMessage::user(human)]
}

/// Messages asking for a participant panel as JSON.
pub fn participant_messages(
    topic: &str,
    max_participants: usize,
    feedback: Option<&str>,
) -> Vec<ChatMessage> {
    let system = PARTICIPANTS_SYSTEM
        .replace("{topic}", topic)
        .replace("{feedback}", feedback.unwrap_or("(none)"))
        .replace("{max}", &max_participants.to_string());
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Create up to {} analysts.", max_participants)),
    ]
}

/// Number sources as `Document # n` blocks separated by `***`.
pub fn format_sources(sources: &[String]) -> String {
    if sources.is_empty() {
        return NO_CONTEXT.to_string();
    }
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Document # {}\n{}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n *** \n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::types::Role;

    fn ada() -> Participant {
        Participant::new("Ada", "Benchmark lead", "Focuses on evaluation methodology")
    }

    #[test]
    fn test_question_flips_roles_for_asker() {
        let mut log = ConversationLog::new();
        log.push_asker("Hi, I'm Ada. What changed?");
        log.push_responder("Context length grew.");

        let msgs = question_messages("So you said...?", &ada(), &log, "Thank you so much for your help");
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.contains("Name: Ada"));
        assert!(msgs[0].content.contains("\"Thank you so much for your help\""));
        assert_eq!(msgs[1].content, "So you said...?");
        assert_eq!(msgs[2].role, Role::Assistant);
        assert_eq!(msgs[3].role, Role::User);
    }

    #[test]
    fn test_answer_flips_roles_for_responder() {
        let mut log = ConversationLog::new();
        log.push_asker("What changed?");
        let msgs = answer_messages("LLM evals", &log, &["doc a".to_string()]);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.contains("LLM evals"));
        assert!(msgs[0].content.contains("Document # 1\ndoc a"));
        assert_eq!(msgs[1].role, Role::User);
    }

    #[test]
    fn test_search_query_sees_whole_conversation() {
        let mut log = ConversationLog::new();
        log.push_asker("Hi, I'm Ada. How are evals run?");
        log.push_responder("Mostly offline.");
        log.push_asker("What about online A/B tests?");

        let msgs = search_query_messages("LLM evals", &log);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.contains("about: LLM evals"));
        assert!(msgs[1].content.contains("Responder: Mostly offline."));
        assert!(msgs[1].content.ends_with("Asker: What about online A/B tests?"));
    }

    #[test]
    fn test_format_sources() {
        assert_eq!(format_sources(&[]), NO_CONTEXT);
        let joined = format_sources(&["a".to_string(), "b".to_string()]);
        assert_eq!(joined, "Document # 1\na\n *** \nDocument # 2\nb");
    }

    #[test]
    fn test_section_includes_feedback() {
        let log = ConversationLog::new();
        let msgs = section_messages(&ada(), &log, &[], Some("Shorter please"));
        assert!(msgs[1].content.contains("Shorter please"));
        assert!(msgs[1].content.contains("evaluation methodology"));
    }

    #[test]
    fn test_participant_prompt_mentions_limit() {
        let msgs = participant_messages("agents", 2, None);
        assert!(msgs[0].content.contains("top 2 themes"));
        assert!(msgs[0].content.contains("(none)"));
    }
}

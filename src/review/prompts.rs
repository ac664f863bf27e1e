use super::coordinator::ReviewContext;
use super::reviewer::Reviewer;
use super::scores::ScoreDimension;

pub(crate) const REVIEW_SYSTEM: &str =
    "You are a rigorous peer reviewer. Respond with a single JSON object and nothing else.";

pub(crate) fn build_review_prompt(
    reviewer: &Reviewer,
    document: &str,
    context: &ReviewContext,
) -> String {
    let role = reviewer.role().display_name();
    let focus_list = reviewer
        .profile()
        .focus_areas()
        .iter()
        .map(|area| format!("- {area}"))
        .collect::<Vec<_>>()
        .join("\n");

    let score_keys = ScoreDimension::ALL
        .iter()
        .map(|d| format!("\"{}\": <1-10>", d.key()))
        .collect::<Vec<_>>()
        .join(", ");

    let previous_section = context
        .previous_feedback
        .as_ref()
        .map(|feedback| {
            format!(
                "\n## Previous Round\n\nThe authors revised the document in response to this feedback. \
                 Judge whether it was addressed.\n\n{feedback}\n"
            )
        })
        .unwrap_or_default();

    format!(
        r#"# {role} Review (round {round})

You are reviewing a document on: **{topic}**
{context_section}{previous_section}
## Focus Areas

{focus_list}

## Document

{document}

## Response Format

Return a JSON object:

{{"scores": {{{score_keys}}}, "summary": "...", "strengths": ["..."], "weaknesses": ["..."], "suggestions": ["..."], "detailed_feedback": "..."}}
"#,
        round = context.round_number,
        topic = context.topic,
        context_section = context
            .context
            .as_ref()
            .map(|c| format!("\n{c}\n"))
            .unwrap_or_default(),
    )
}

use crate::models::Session;

pub fn export_to_markdown(session: &Session) -> String {
    session
        .messages
        .iter()
        .map(|msg| format!("**{}**: {}", msg.role.as_str().to_uppercase(), msg.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// File name for an exported session: every non-alphanumeric ASCII
/// character in the title becomes `_`.
pub fn export_file_name(session: &Session) -> String {
    let stem: String = session
        .title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}.md", stem)
}

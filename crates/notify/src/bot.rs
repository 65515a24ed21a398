/// Whether a request's user agent matches one of the crawler tokens.
///
/// Matching is case-insensitive substring containment. No user agent (a
/// non-HTTP context) is never a bot, and neither is anything when the token
/// list is empty. Blank tokens are ignored.
pub fn is_from_bot(user_agent: Option<&str>, ignored_bots: &[String]) -> bool {
    let Some(agent) = user_agent else {
        return false;
    };
    let agent = agent.to_lowercase();

    ignored_bots
        .iter()
        .map(|bot| bot.trim())
        .filter(|bot| !bot.is_empty())
        .any(|bot| agent.contains(&bot.to_lowercase()))
}

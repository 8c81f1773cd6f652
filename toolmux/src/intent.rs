//! Meta-query classification for free-text instructions.
//!
//! Deterministic substring predicates; the model is never consulted.

const LISTING_WORDS: [&str; 3] = ["list", "available", "what are"];

fn asks_for_listing(lower: &str, noun: &str) -> bool {
    lower.contains(noun) && LISTING_WORDS.iter().any(|w| lower.contains(w))
}

/// "what services are available", "list services", ...
pub fn is_list_services_query(query: &str) -> bool {
    asks_for_listing(&query.to_lowercase(), "service")
}

/// "list tools for git", "what are the available tools", ...
pub fn is_list_tools_query(query: &str) -> bool {
    asks_for_listing(&query.to_lowercase(), "tool")
}

/// Find a known service name mentioned in `input`.
///
/// Matching is case-insensitive substring containment; when several names
/// match, the longest wins (ties go to the lexicographically smaller name) so
/// the result does not depend on the vocabulary's order.
pub fn extract_service_name<'a, I>(input: &str, vocabulary: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let lower = input.to_lowercase();
    vocabulary
        .into_iter()
        .map(str::to_lowercase)
        .filter(|name| !name.is_empty() && lower.contains(name.as_str()))
        .min_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn services_query() {
        assert!(is_list_services_query("What services are available?"));
        assert!(is_list_services_query("list services"));
        assert!(is_list_services_query("what are your services"));
        assert!(!is_list_services_query("restart the docker service"));
        assert!(!is_list_services_query("list the containers"));
    }

    #[test]
    fn tools_query() {
        assert!(is_list_tools_query("list tools for git"));
        assert!(is_list_tools_query("Which TOOLS are available"));
        assert!(!is_list_tools_query("use the git tool to init a repo"));
    }

    #[test]
    fn service_name_extraction() {
        let vocab = ["docker", "git", "gitlab"];
        assert_eq!(extract_service_name("list tools for git", vocab), Some("git".to_string()));
        assert_eq!(extract_service_name("list tools for GitLab", vocab), Some("gitlab".to_string()));
        assert_eq!(extract_service_name("list Docker tools", vocab), Some("docker".to_string()));
        assert_eq!(extract_service_name("list all tools", vocab), None);
        assert_eq!(extract_service_name("anything", [""]), None);
    }

    #[test]
    fn mixed_case_vocabulary() {
        assert_eq!(extract_service_name("tools for docker", ["Docker"]), Some("docker".to_string()));
    }
}

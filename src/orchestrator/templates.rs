//! Fixed text the runners produce without calling the generation service.

/// Marker line every placeholder artifact contains.
pub const FALLBACK_SIGNATURE: &str = "Placeholder Python code - coder produced empty output";

/// Minimal runnable program used when the coder returns nothing.
pub const FALLBACK_STUB: &str = "# Placeholder Python code - coder produced empty output
def main():
    print('Hello from MACC placeholder')


if __name__ == '__main__':
    main()
";

pub fn is_fallback_stub(artifact: &str) -> bool {
    artifact.contains(FALLBACK_SIGNATURE)
}

/// Deterministic README for a session.
pub fn description(repo: &str, spec: &str) -> String {
    format!(
        "# {}\n\n{}\n\nGenerated by MACC - Multi-Agent Code Collaborator\n",
        repo, spec
    )
}

/// Review instructions for the first review pass of a new session.
pub fn review_instructions(spec: &str) -> String {
    format!(
        "Review and improve the code so it fully implements this specification: {}",
        spec
    )
}

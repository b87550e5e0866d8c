//! Shell integration snippets
//!
//! `session switch` can only print an `export` line; a child process cannot
//! change its parent's environment. The wrapper function below evaluates that
//! line in the calling shell and unsets `KUBECONFIG` after a stop.

use clap::ValueEnum;

/// Shells with an integration snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShellKind {
    Bash,
    Zsh,
}

const POSIX_WRAPPER: &str = r#"# ekssm shell integration
# Add to your shell rc file:  eval "$(ekssm shell <bash|zsh>)"
ekssm() {
    if [ "$1" = "session" ] && [ "$2" = "switch" ] && [ -n "$3" ]; then
        local __ekssm_out
        __ekssm_out="$(command ekssm session switch "$3")" || return $?
        eval "$__ekssm_out"
    elif [ "$1" = "session" ] && [ "$2" = "stop" ]; then
        command ekssm "$@" && unset KUBECONFIG
    else
        command ekssm "$@"
    fi
}
"#;

/// Snippet to `eval` in the given shell
///
/// bash and zsh share the same POSIX-style function body.
pub fn shell_integration(shell: ShellKind) -> &'static str {
    match shell {
        ShellKind::Bash | ShellKind::Zsh => POSIX_WRAPPER,
    }
}

//! `command ls`: render the root listing as text.

use std::sync::Arc;

use super::Next;
use crate::error::Result;
use crate::handler::{FileInfo, TransferHandler};
use crate::session::Session;

fn is_list_command(command: &[String]) -> bool {
    command.len() == 2 && command[0] == "command" && command[1] == "ls"
}

/// Names sorted, separators stripped, directories suffixed with `/`,
/// joined with CRLF. Entries without a name (the root itself) are skipped.
pub(crate) fn render(entries: &[FileInfo]) -> String {
    let mut names: Vec<String> = entries
        .iter()
        .filter_map(|entry| {
            let mut name = entry.name.trim_end_matches('/').to_string();
            // The root's own entry
            if name.is_empty() {
                return None;
            }
            if entry.is_dir {
                name.push('/');
            }
            Some(name)
        })
        .collect();
    names.sort();
    names.join("\r\n")
}

pub(super) async fn serve(
    handler: &dyn TransferHandler,
    session: &mut Session,
    next: Next<'_>,
) -> Result<()> {
    let ctx = Arc::clone(session.context());
    if !is_list_command(ctx.command()) {
        return next.run(session).await;
    }

    let entries = handler.list(&ctx, "/").await?;
    session.write_stdout(render(&entries).as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_sorts_and_marks_directories() {
        let entries = [FileInfo::file("b.txt", 3), FileInfo::dir("a")];
        assert_eq!(render(&entries), "a/\r\nb.txt");
    }

    #[test]
    fn render_strips_trailing_separators() {
        let entries = [FileInfo::dir("docs/"), FileInfo::file("z", 0)];
        assert_eq!(render(&entries), "docs/\r\nz");
    }

    #[test]
    fn render_skips_root_entry() {
        let entries = [FileInfo::dir("/"), FileInfo::file("a.txt", 1)];
        assert_eq!(render(&entries), "a.txt");
    }

    #[test]
    fn render_empty_listing() {
        assert_eq!(render(&[]), "");
    }

    #[test]
    fn list_command_is_exact() {
        let cmd = |s: &str| s.split_whitespace().map(String::from).collect::<Vec<_>>();
        assert!(is_list_command(&cmd("command ls")));
        assert!(!is_list_command(&cmd("command ls -l")));
        assert!(!is_list_command(&cmd("ls")));
    }
}

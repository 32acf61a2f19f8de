use super::*;
use std::{
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_root(label: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let root = env::temp_dir().join(format!("light_show_{label}_{suffix}"));
    fs::create_dir_all(&root).expect("temp root");
    root
}

fn text(shell: &ProcessShell) -> String {
    String::from_utf8_lossy(shell.text_before_prompt()).to_string()
}

#[test]
fn marker_is_split_from_following_output() {
    let output = OutputBuffer::default();
    output.push(b"hello\n[LIGHTSHOW]4$ \nnext");
    assert_eq!(
        output.take_through_marker().expect("marker"),
        (4, b"hello\n".to_vec())
    );
    assert!(output.take_through_marker().is_none());
    assert_eq!(output.snapshot(), "next");
}

#[test]
fn partial_marker_is_not_a_prompt() {
    let output = OutputBuffer::default();
    output.push(b"out\n[LIGHT");
    assert!(output.take_through_marker().is_none());
    output.push(b"SHOW]1");
    assert!(output.take_through_marker().is_none());
    output.push(b"2$");
    assert!(output.take_through_marker().is_none());
    output.push(b" \n");
    assert_eq!(
        output.take_through_marker().expect("marker"),
        (12, b"out\n".to_vec())
    );
}

#[test]
fn marker_lookalikes_stay_in_the_output() {
    let output = OutputBuffer::default();
    output.push(b"[LIGHTSHOW]x\n[LIGHTSHOW]$ \nreal\n[LIGHTSHOW]2$ \n");
    let (seq, before) = output.take_through_marker().expect("marker");
    assert_eq!(seq, 2);
    assert_eq!(before, b"[LIGHTSHOW]x\n[LIGHTSHOW]$ \nreal\n");
}

#[test]
fn consecutive_markers_come_out_in_order() {
    let output = OutputBuffer::default();
    output.push(b"old\n[LIGHTSHOW]1$ \nnew\n[LIGHTSHOW]2$ \n");
    assert_eq!(
        output.take_through_marker().expect("first"),
        (1, b"old\n".to_vec())
    );
    assert_eq!(
        output.take_through_marker().expect("second"),
        (2, b"new\n".to_vec())
    );
}

#[tokio::test]
async fn late_prompt_does_not_shift_later_replies() {
    let root = temp_root("shell_late_prompt");
    let mut shell = LocalShellConnector::new(&root)
        .login("localhost", "root", "")
        .await
        .expect("local login");

    shell.send_line("sleep 1 ; echo 0").await.expect("send slow");
    for _ in 0..3 {
        assert!(!shell
            .await_prompt(Duration::from_millis(100))
            .await
            .expect("no prompt yet"));
    }

    for value in ["1", "2"] {
        shell
            .send_line(&format!("echo {value}"))
            .await
            .expect("send");
        assert!(shell
            .await_prompt(Duration::from_secs(5))
            .await
            .expect("prompt"));
        assert_eq!(
            String::from_utf8_lossy(shell.text_before_prompt()),
            format!("{value}\n")
        );
    }

    shell.logout().await.expect("logout");
    fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn local_shell_round_trips_command_output() {
    let root = temp_root("shell_roundtrip");
    let connector = LocalShellConnector::new(&root);
    let mut shell = connector
        .login("localhost", "root", "")
        .await
        .expect("local login");

    shell.send_line("echo hello ; echo world").await.expect("send");
    assert!(shell
        .await_prompt(Duration::from_secs(5))
        .await
        .expect("prompt"));
    assert_eq!(
        String::from_utf8_lossy(shell.text_before_prompt()),
        "hello\nworld\n"
    );

    assert!(shell.is_alive().await);
    shell.logout().await.expect("logout");
    fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn stderr_is_captured_before_prompt() {
    let root = temp_root("shell_stderr");
    let mut shell = ProcessShell::spawn(
        {
            let mut command = Command::new("sh");
            command.current_dir(&root);
            command
        },
        Duration::from_secs(5),
    )
    .await
    .expect("spawn");

    shell.send_line("cat missing/brightness").await.expect("send");
    assert!(shell
        .await_prompt(Duration::from_secs(5))
        .await
        .expect("prompt"));
    assert!(text(&shell).contains("missing/brightness"));
    fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn exited_shell_reports_session_loss() {
    let root = temp_root("shell_exit");
    let mut shell = ProcessShell::spawn(
        {
            let mut command = Command::new("sh");
            command.current_dir(&root);
            command
        },
        Duration::from_secs(5),
    )
    .await
    .expect("spawn");

    shell.logout().await.expect("logout");
    let result = shell.await_prompt(Duration::from_secs(5)).await;
    assert!(result.is_err(), "closed shell must not report a prompt");
    assert!(!shell.is_alive().await);
    fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn missing_program_fails_login() {
    let connector = SshConnector {
        program: "definitely-not-an-ssh-client".into(),
        ..SshConnector::default()
    };
    let err = connector
        .login("192.0.2.1", "root", "")
        .await
        .err()
        .expect("login must fail");
    assert!(matches!(err, ShowError::Connection(_)));
}

#[test]
fn password_login_goes_through_sshpass() {
    let connector = SshConnector {
        use_sshpass: true,
        ..SshConnector::default()
    };
    let command = connector.command("10.0.0.1", "root", "secret");
    let std = command.as_std();
    assert_eq!(std.get_program(), "sshpass");
    let args: Vec<_> = std.get_args().map(|a| a.to_string_lossy().to_string()).collect();
    assert_eq!(args.first().map(String::as_str), Some("-e"));
    assert!(args.contains(&"root@10.0.0.1".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("sh"));
}

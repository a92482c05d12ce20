//! End-to-end interpreter scenarios: real processes, pipelines,
//! redirections, imports and interruption.

use std::sync::Arc;

use nash::interpreter::Control;
use nash::streams::{CaptureBuffer, Output};
use nash::{Obj, Shell};

async fn shell_with_capture() -> (Arc<Shell>, CaptureBuffer) {
    let shell = Shell::new_root().await.expect("root shell setup");
    let (stdout, buffer) = Output::capture();
    shell.set_stdout(stdout);
    (shell, buffer)
}

fn captured(buffer: &CaptureBuffer) -> String {
    let data = buffer.lock().unwrap();
    String::from_utf8_lossy(&data).into_owned()
}

fn status(shell: &Shell) -> String {
    match shell.get_var("status") {
        Some(Obj::Str(s)) => s,
        other => panic!("status is not a string: {:?}", other),
    }
}

#[tokio::test]
async fn assignment_and_echo() {
    let (shell, buffer) = shell_with_capture().await;
    shell.exec("test", "a = \"hi\"\necho $a").await.unwrap();
    assert_eq!(captured(&buffer), "hi\n");
    assert_eq!(status(&shell), "0");
}

#[tokio::test]
async fn list_index() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec("test", "l = (\"a\" \"b\" \"c\")\necho $l[1]")
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "b\n");
}

#[tokio::test]
async fn list_spreads_into_command_arguments() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec("test", "l = (\"a\" \"b\" \"c\")\necho $l")
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "a b c\n");
}

#[tokio::test]
async fn exec_assign_with_ifs_split() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "IFS = (\" \" \"\\n\")\nout <= echo -n \"x y z\"\necho $out[2]",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "z\n");
}

#[tokio::test]
async fn exec_assign_without_ifs_keeps_whole_output() {
    let (shell, _buffer) = shell_with_capture().await;
    shell.exec("test", "out <= echo hello").await.unwrap();
    assert_eq!(shell.get_var("out"), Some(Obj::Str("hello\n".into())));
}

#[tokio::test]
async fn exec_assign_binds_output_even_on_failure() {
    let (shell, _buffer) = shell_with_capture().await;
    let err = shell
        .exec("test", "out <= sh -c \"echo partial && exit 3\"")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exit status 3"), "got: {}", err);
    assert_eq!(shell.get_var("out"), Some(Obj::Str("partial\n".into())));
    assert_eq!(status(&shell), "3");
}

#[tokio::test]
async fn pipeline_wires_stdout_to_stdin() {
    let (shell, buffer) = shell_with_capture().await;
    shell.exec("test", "echo hello | cat").await.unwrap();
    assert_eq!(captured(&buffer), "hello\n");
    assert_eq!(status(&shell), "0");
}

#[tokio::test]
async fn three_stage_pipeline() {
    let (shell, buffer) = shell_with_capture().await;
    shell.exec("test", "echo hello | cat | cat").await.unwrap();
    assert_eq!(captured(&buffer), "hello\n");
    assert_eq!(status(&shell), "0");
}

#[tokio::test]
async fn ignored_pipeline_stage_does_not_fail() {
    let (shell, _buffer) = shell_with_capture().await;
    shell.exec("test", "-false | true").await.unwrap();
    // the failing stage reports its code; the waited stage stays at 0
    assert_eq!(status(&shell), "1|0");
}

#[tokio::test]
async fn failing_pipeline_reports_joined_stage_errors() {
    let (shell, _buffer) = shell_with_capture().await;
    let err = shell.exec("test", "false | cat").await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains('|'), "expected joined stage errors: {}", msg);
    assert!(msg.contains("exit status 1"), "got: {}", msg);
    assert!(status(&shell).contains('1'));
}

#[tokio::test]
async fn command_not_found_sets_status_127() {
    let (shell, _buffer) = shell_with_capture().await;
    let err = shell
        .exec("test", "definitely-not-a-command-xyz")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("command not found"), "got: {}", err);
    assert_eq!(status(&shell), "127");
}

#[tokio::test]
async fn minus_prefix_ignores_command_failure() {
    let (shell, buffer) = shell_with_capture().await;
    shell.exec("test", "-false\necho after").await.unwrap();
    assert_eq!(captured(&buffer), "after\n");
    assert_eq!(status(&shell), "0");
}

#[tokio::test]
async fn bindfn_runs_as_command() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "fn greet() {\n\techo hello\n}\nbindfn greet hi\nhi",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "hello\n");
    assert_eq!(status(&shell), "0");
}

#[tokio::test]
async fn bindfn_pads_missing_arguments() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "fn show(x) {\n\tif $x == \"\" {\n\t\techo empty\n\t} else {\n\t\techo $x\n\t}\n}\nbindfn show s\ns",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "empty\n");
}

#[tokio::test]
async fn return_from_function() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "fn two() {\n\treturn \"2\"\n}\nx <= two()\necho $x",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "2\n");
}

#[tokio::test]
async fn return_inside_if_stops_the_function() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "fn pick(x) {\n\tif $x == \"a\" {\n\t\treturn \"first\"\n\t}\n\treturn \"other\"\n}\nr <= pick(\"a\")\necho $r",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "first\n");
}

#[tokio::test]
async fn function_invocation_through_variable() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec("test", "fn noisy() {\n\techo called\n}\n$noisy()")
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "called\n");
}

#[tokio::test]
async fn if_else_dispatch() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "a = \"x\"\nif $a == \"y\" {\n\techo eq\n} else {\n\techo ne\n}",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "ne\n");
}

#[tokio::test]
async fn for_loop_iterates_list() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "l = (\"1\" \"2\" \"3\")\nfor x in $l {\n\techo $x\n}",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "1\n2\n3\n");
}

#[tokio::test]
async fn interrupt_stops_loop_at_iteration_boundary() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec("test", "l = (\"a\" \"b\" \"c\")")
        .await
        .unwrap();

    shell.trigger_interrupt();
    let err = shell
        .exec("test", "for x in $l {\n\techo $x\n}")
        .await
        .unwrap_err();
    assert!(matches!(err, Control::Interrupted(_)), "got: {}", err);
    assert_eq!(err.to_string(), "loop interrupted");
    // the first body completes before the boundary check fires
    assert_eq!(captured(&buffer), "a\n");
}

#[tokio::test]
async fn redirect_stdout_to_file() {
    let (shell, _buffer) = shell_with_capture().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    shell
        .exec("test", &format!("echo hi > {}", path.display()))
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hi\n");
}

#[tokio::test]
async fn redirect_suppresses_stderr() {
    let (shell, buffer) = shell_with_capture().await;
    let err = shell
        .exec("test", "sh -c \"echo oops >&2 && exit 1\" >[2=]")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exit status 1"));
    assert_eq!(captured(&buffer), "");
}

#[tokio::test]
async fn setenv_mirrors_into_process_environment() {
    let (shell, _buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "NASH_IT_SETENV = \"v42\"\nsetenv NASH_IT_SETENV",
        )
        .await
        .unwrap();
    assert_eq!(std::env::var("NASH_IT_SETENV").as_deref(), Ok("v42"));
    assert_eq!(
        shell.getenv("NASH_IT_SETENV"),
        Some(Obj::Str("v42".into()))
    );
    assert_eq!(
        shell.get_var("NASH_IT_SETENV"),
        Some(Obj::Str("v42".into()))
    );
}

#[tokio::test]
async fn environment_reaches_child_processes() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "NASH_IT_CHILD = \"seen\"\nsetenv NASH_IT_CHILD\nsh -c \"echo $NASH_IT_CHILD\"",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "seen\n");
}

#[tokio::test]
async fn import_resolves_through_nashpath_lib() {
    let (shell, buffer) = shell_with_capture().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("lib")).unwrap();
    std::fs::write(
        dir.path().join("lib/util.sh"),
        "fn f() {\n\techo ok\n}\n",
    )
    .unwrap();

    shell.setenv(
        "NASHPATH",
        Obj::Str(dir.path().display().to_string()),
    );
    shell.exec("test", "import util\nf()").await.unwrap();
    assert_eq!(captured(&buffer), "ok\n");
}

#[tokio::test]
async fn import_without_nashpath_fails() {
    let (shell, _buffer) = shell_with_capture().await;
    // NASHPATH is only present when the test runner's environment
    // exported it; the error path needs it absent
    if shell.getenv("NASHPATH").is_none() {
        let err = shell.exec("test", "import util").await.unwrap_err();
        assert!(err.to_string().contains("NASHPATH"), "got: {}", err);
    }
}

#[tokio::test]
async fn import_lists_tried_locations_when_missing() {
    let (shell, _buffer) = shell_with_capture().await;
    let dir = tempfile::tempdir().unwrap();
    shell.setenv(
        "NASHPATH",
        Obj::Str(dir.path().display().to_string()),
    );
    let err = shell
        .exec("test", "import missing_module_xyz")
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("Failed to import path"), "got: {}", msg);
    assert!(msg.contains("missing_module_xyz.sh"), "got: {}", msg);
}

#[tokio::test]
async fn builtin_len_over_exec_assign() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec("test", "l = (\"a\" \"b\")\nn <= len($l)\necho $n")
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "2\n");
}

#[tokio::test]
async fn builtin_append_grows_list() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "l = (\"a\")\nl2 <= append($l, \"b\")\necho $l2",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "a b\n");
}

#[tokio::test]
async fn anonymous_functions_get_lambda_names() {
    let (shell, _buffer) = shell_with_capture().await;
    shell
        .exec("test", "fn () {\n\techo anon\n}")
        .await
        .unwrap();
    let dump = shell.dump_string();
    assert!(dump.contains("lambda 0"), "dump was:\n{}", dump);
}

#[tokio::test]
async fn dump_writes_to_file() {
    let (shell, _buffer) = shell_with_capture().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.dump");
    shell
        .exec(
            "test",
            &format!("marker = \"dumped\"\ndump {}", path.display()),
        )
        .await
        .unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("marker = \"dumped\""));
}

#[tokio::test]
async fn concat_builds_command_argument() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec("test", "dir = \"/tmp\"\necho $dir+\"/file\"")
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "/tmp/file\n");
}

#[tokio::test]
async fn return_outside_function_is_an_error() {
    let (shell, _buffer) = shell_with_capture().await;
    let err = shell.exec("test", "return \"x\"").await.unwrap_err();
    assert!(
        err.to_string().contains("outside of function"),
        "got: {}",
        err
    );
}

#[tokio::test]
async fn rfork_is_parsed_but_not_supported() {
    let (shell, _buffer) = shell_with_capture().await;
    let err = shell
        .exec("test", "rfork unp {\n\techo inside\n}")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("rfork"), "got: {}", err);
}

#[tokio::test]
async fn function_as_pipeline_stage_via_bindfn() {
    let (shell, buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "fn produce() {\n\techo from-fn\n}\nbindfn produce producecmd\nproducecmd | cat",
        )
        .await
        .unwrap();
    assert_eq!(captured(&buffer), "from-fn\n");
}

#[tokio::test]
async fn subshell_assignments_stay_local() {
    let (shell, _buffer) = shell_with_capture().await;
    shell
        .exec(
            "test",
            "a = \"outer\"\nfn shadow() {\n\ta = \"inner\"\n\treturn $a\n}\nr <= shadow()",
        )
        .await
        .unwrap();
    assert_eq!(shell.get_var("a"), Some(Obj::Str("outer".into())));
    assert_eq!(shell.get_var("r"), Some(Obj::Str("inner".into())));
}

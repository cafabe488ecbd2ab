#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use ci_suite::compile::{CompiledBlock, RenderContext, compile, render_script, render_sequence};
use ci_suite::operation::{CommandSequence, SequenceBuilder};
use ci_suite::registry::build_registry;
use ci_suite::sandbox::{SandboxPolicy, sandbox};
use ci_suite::wrapper::{HarnessInvocation, wrap};
use tempfile::tempdir;

fn run_script(script: &str, cwd: &Path, extra_env: &[(&str, &str)]) -> Output {
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(script).current_dir(cwd);
    for (name, value) in extra_env {
        command.env(name, value);
    }
    command.output().expect("failed to spawn /bin/sh")
}

fn script_for(sequence: &CommandSequence) -> String {
    render_script(sequence).unwrap()
}

/// Runs the sequence the way the harness does: as the body of a function.
fn run_as_function(sequence: &CommandSequence, cwd: &Path) -> Output {
    let body = render_sequence(sequence, RenderContext::Function)
        .unwrap()
        .join("\n");
    run_script(&format!("check() {{\n{body}\n}}\ncheck"), cwd, &[])
}

fn write_executable(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
    let mut permissions = fs::metadata(path).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).unwrap();
}

fn path_policy() -> SandboxPolicy {
    SandboxPolicy::empty("/usr/bin/env", "/bin/sh")
        .propagate("PATH")
        .unwrap()
}

fn fail_fast_sequence(marker: &Path) -> CommandSequence {
    SequenceBuilder::new()
        .invoke(["sh", "-c", "exit 0"])
        .unwrap()
        .invoke(["sh", "-c", "exit 7"])
        .unwrap()
        .invoke(["touch", marker.to_str().unwrap()])
        .unwrap()
        .build()
}

#[test]
fn sequence_stops_at_first_failure_with_its_status() {
    let temp = tempdir().unwrap();
    let marker = temp.path().join("should-not-exist");
    let sequence = fail_fast_sequence(&marker);

    let output = run_script(&script_for(&sequence), temp.path(), &[]);
    assert_eq!(output.status.code(), Some(7));
    assert!(!marker.exists(), "step after the failure ran");

    let output = run_as_function(&sequence, temp.path());
    assert_eq!(output.status.code(), Some(7));
    assert!(!marker.exists(), "step after the failure ran");
}

#[test]
fn later_steps_observe_earlier_mutations() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    let work = temp.path().join("work");
    fs::create_dir_all(&bin).unwrap();
    fs::create_dir_all(&work).unwrap();
    write_executable(
        &bin.join("probe"),
        "#!/bin/sh\nprintf '%s %s\\n' \"$GREETING\" \"$(pwd -P)\" > probe.out\n",
    );

    let sequence = SequenceBuilder::new()
        .set_env("GREETING", "hello world")
        .unwrap()
        .prepend_path([bin.clone()])
        .unwrap()
        .change_dir(&work)
        .unwrap()
        .invoke(["probe"])
        .unwrap()
        .build();

    let output = run_script(&script_for(&sequence), temp.path(), &[]);
    assert!(output.status.success(), "{output:?}");
    let recorded = fs::read_to_string(work.join("probe.out")).unwrap();
    let work = work.canonicalize().unwrap();
    assert_eq!(recorded.trim_end(), format!("hello world {}", work.display()));
}

#[test]
fn all_succeed_runs_every_command_and_reports_first_failure() {
    let temp = tempdir().unwrap();
    let last = temp.path().join("last-ran");
    let sequence = SequenceBuilder::new()
        .all_succeed([
            vec!["sh", "-c", "exit 3"],
            vec!["sh", "-c", "exit 5"],
            vec!["touch", last.to_str().unwrap()],
        ])
        .unwrap()
        .invoke(["touch", "after-group"])
        .unwrap()
        .build();

    let output = run_as_function(&sequence, temp.path());
    assert_eq!(output.status.code(), Some(3));
    assert!(last.exists(), "group stopped early");
    assert!(!temp.path().join("after-group").exists());

    let passing = SequenceBuilder::new()
        .all_succeed([vec!["true"], vec!["true"]])
        .unwrap()
        .build();
    assert!(run_as_function(&passing, temp.path()).status.success());
}

#[test]
fn sandboxed_outcome_ignores_ambient_variables() {
    let temp = tempdir().unwrap();
    let inner = SequenceBuilder::new().invoke(["env"]).unwrap().build();
    let script = script_for(&sandbox(&path_policy(), inner));

    let plain = run_script(&script, temp.path(), &[]);
    let perturbed = run_script(
        &script,
        temp.path(),
        &[("CI_SUITE_AMBIENT_NOISE", "1"), ("HTTP_PROXY", "http://proxy.invalid:3128")],
    );

    assert!(plain.status.success(), "{plain:?}");
    assert_eq!(plain.status.code(), perturbed.status.code());
    assert_eq!(plain.stdout, perturbed.stdout);
    let listing = String::from_utf8_lossy(&perturbed.stdout);
    assert!(!listing.contains("CI_SUITE_AMBIENT_NOISE"));
    assert!(listing.lines().any(|line| line.starts_with("PATH=")));
}

#[test]
fn sandbox_does_not_fall_back_to_ambient_values() {
    let temp = tempdir().unwrap();
    let inner = SequenceBuilder::new()
        .invoke([
            "sh",
            "-c",
            "test -n \"${TMPDIR:-}\" || { echo 'TMPDIR is not set' >&2; exit 3; }",
        ])
        .unwrap()
        .build();
    let script = script_for(&sandbox(&path_policy(), inner.clone()));

    let output = run_script(&script, temp.path(), &[("TMPDIR", "/tmp")]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("TMPDIR is not set"));

    let allowed = path_policy().set("TMPDIR", "/tmp").unwrap();
    let script = script_for(&sandbox(&allowed, inner));
    assert!(run_script(&script, temp.path(), &[]).status.success());
}

#[test]
fn wrapper_exit_status_and_arguments_come_from_the_harness() {
    let temp = tempdir().unwrap();
    let record = temp.path().join("harness.args");
    let env_record = temp.path().join("harness.env");
    let harness = temp.path().join("fake-harness");
    write_executable(
        &harness,
        &format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\n/usr/bin/env > '{}'\nexit 3\n",
            record.display(),
            env_record.display()
        ),
    );

    let suite_path = temp.path().join("suite.bats");
    fs::write(&suite_path, "").unwrap();
    let executable = wrap(
        &suite_path,
        &HarnessInvocation {
            program: harness.clone(),
            jobs: 4,
            policy: path_policy(),
        },
    );
    let wrapper = temp.path().join("run-checks");
    write_executable(&wrapper, executable.as_str());

    let output = Command::new("/bin/sh")
        .arg(&wrapper)
        .env("CI_SUITE_AMBIENT_NOISE", "1")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));

    let args: Vec<String> = fs::read_to_string(&record)
        .unwrap()
        .lines()
        .map(String::from)
        .collect();
    assert_eq!(
        args,
        vec![
            "--jobs".to_string(),
            "4".to_string(),
            suite_path.display().to_string()
        ]
    );
    let environment = fs::read_to_string(&env_record).unwrap();
    assert!(!environment.contains("CI_SUITE_AMBIENT_NOISE"));
}

fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn scenario_config(bin: &Path, linter_status: i32) -> String {
    let formatter = bin.join("formatter");
    let linter = bin.join("linter");
    write_executable(&formatter, "#!/bin/sh\nexit 0\n");
    write_executable(
        &linter,
        &format!("#!/bin/sh\ntest \"$STRICT\" = 1 || exit 9\nexit {linter_status}\n"),
    );
    format!(
        r#"version: 1
tools:
  formatter: {}
  linter: {}
checks:
  fmt:
    description: formatting is clean
    commands:
      - run: [formatter, --check]
  lint:
    description: no lint warnings
    commands:
      - env: {{STRICT: "1"}}
      - run: [linter]
"#,
        formatter.display(),
        linter.display()
    )
}

fn run_scenario(dir: &Path, linter_status: i32) -> (Output, PathBuf) {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).unwrap();
    let config = ci_suite::CiConfig::from_yaml_str(&scenario_config(&bin, linter_status)).unwrap();
    let artifacts = ci_suite::generate(&config, &dir.join("out")).unwrap();
    let output = Command::new(&artifacts.executable).output().unwrap();
    (output, artifacts.suite)
}

/// Runs a compiled block's body as a plain shell function.
fn run_block(block: &CompiledBlock, cwd: &Path) -> Output {
    let body: Vec<&str> = block.text.lines().skip(1).collect();
    run_script(&format!("check() {{\n{}\ncheck", body.join("\n")), cwd, &[])
}

#[test]
fn compiled_blocks_pass_and_fail_independently() {
    let temp = tempdir().unwrap();

    for linter_status in [0, 1] {
        let bin = temp.path().join(format!("bin-{linter_status}"));
        fs::create_dir_all(&bin).unwrap();
        let config =
            ci_suite::CiConfig::from_yaml_str(&scenario_config(&bin, linter_status)).unwrap();
        let suite = compile(&build_registry(&config).unwrap()).unwrap();
        let names: Vec<_> = suite.blocks().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["fmt", "lint"]);

        let fmt = run_block(&suite.blocks()[0], temp.path());
        assert_eq!(fmt.status.code(), Some(0), "{fmt:?}");
        let lint = run_block(&suite.blocks()[1], temp.path());
        assert_eq!(lint.status.code(), Some(linter_status), "{lint:?}");
    }
}

#[test]
#[ignore = "requires bats and GNU parallel"]
fn harness_reports_each_check_independently() {
    assert!(
        tool_available("bats") && tool_available("parallel"),
        "bats and GNU parallel must be installed"
    );

    let temp = tempdir().unwrap();
    let (output, _) = run_scenario(&temp.path().join("passing"), 0);
    let report = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{report}");
    assert!(report.contains("ok 1 formatting is clean") || report.contains("ok 2 formatting is clean"));
    assert_eq!(report.lines().filter(|l| l.starts_with("ok ")).count(), 2);

    let (output, _) = run_scenario(&temp.path().join("failing"), 1);
    let report = String::from_utf8_lossy(&output.stdout);
    assert!(!output.status.success(), "{report}");
    assert!(report.lines().any(|l| l.starts_with("ok ") && l.ends_with("formatting is clean")));
    assert!(report.lines().any(|l| l.starts_with("not ok ") && l.ends_with("no lint warnings")));
}

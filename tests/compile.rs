use ci_suite::compile::{SUITE_HEADER, compile};
use ci_suite::config::{CheckSpec, CiConfig, OperationSpec};
use ci_suite::error::{CompileError, OperationError};
use ci_suite::operation::{Operation, SequenceBuilder};
use ci_suite::registry::{Check, CheckRegistry, build_registry};

const TWO_CHECKS: &str = r#"
version: 1
sandbox:
  env_program: /usr/bin/env
  shell: /bin/sh
  propagate: [PATH]
checks:
  fmt:
    description: formatting is clean
    commands:
      - run: [formatter, --check]
  lint:
    description: no lint warnings
    commands:
      - env: {STRICT: "1"}
      - run: [linter]
"#;

fn registry_from(yaml: &str) -> CheckRegistry {
    let config = CiConfig::from_yaml_str(yaml).unwrap();
    build_registry(&config).unwrap()
}

#[test]
fn two_check_scenario_compiles_to_two_blocks_in_order() {
    let suite = compile(&registry_from(TWO_CHECKS)).unwrap();

    let expected = format!(
        "{SUITE_HEADER}\n\
@test \"formatting is clean\" {{\n\
\x20 /usr/bin/env -i ${{PATH+\"PATH=$PATH\"}} /bin/sh -c 'formatter --check || exit $?' || return $?\n\
}}\n\
\n\
@test \"no lint warnings\" {{\n\
\x20 /usr/bin/env -i ${{PATH+\"PATH=$PATH\"}} /bin/sh -c 'export STRICT=1 || exit $?; linter || exit $?' || return $?\n\
}}\n"
    );
    assert_eq!(suite.as_str(), expected);

    let names: Vec<_> = suite.blocks().iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["fmt", "lint"]);
    assert_eq!(suite.as_str().matches("@test ").count(), 2);
}

#[test]
fn test_blocks_start_and_end_at_column_zero() {
    let suite = compile(&registry_from(TWO_CHECKS)).unwrap();
    for line in suite.as_str().lines() {
        if line.trim_start().starts_with("@test") {
            assert!(line.starts_with("@test \""), "indented header: {line:?}");
            assert!(line.ends_with("\" {"), "header must open the block: {line:?}");
        }
        if line.trim() == "}" {
            assert_eq!(line, "}");
        }
    }
    assert_eq!(suite.as_str().lines().filter(|l| *l == "}").count(), 2);
}

#[test]
fn compile_is_deterministic() {
    let first = compile(&registry_from(TWO_CHECKS)).unwrap();
    let second = compile(&registry_from(TWO_CHECKS)).unwrap();
    assert_eq!(first.as_str().as_bytes(), second.as_str().as_bytes());
}

#[test]
fn quotes_and_dollars_in_descriptions_are_escaped() {
    let yaml = r#"
version: 1
checks:
  price:
    description: 'costs "$5" and `nothing`'
    sandbox: false
    commands:
      - run: ["true"]
"#;
    let suite = compile(&registry_from(yaml)).unwrap();
    assert!(
        suite
            .as_str()
            .contains(r#"@test "costs \"\$5\" and \`nothing\`" {"#),
        "{}",
        suite
    );
    assert_eq!(suite.blocks()[0].description, r#"costs "$5" and `nothing`"#);
}

#[test]
fn unescapable_description_fails_the_whole_suite() {
    let mut registry = registry_from(TWO_CHECKS);
    registry
        .insert(Check {
            name: "multi".to_string(),
            description: "first line\nsecond line".to_string(),
            sequence: SequenceBuilder::new().invoke(["true"]).unwrap().build(),
            sandboxed: false,
            mutates_checkout: false,
        })
        .unwrap();

    let err = compile(&registry).unwrap_err();
    assert!(matches!(
        err,
        CompileError::UnescapableDescription { ref check, .. } if check == "multi"
    ));
}

#[test]
fn hand_built_variable_name_cannot_reach_the_suite() {
    let mut registry = registry_from(TWO_CHECKS);
    let sequence = SequenceBuilder::new()
        .guard(Operation::SetEnv {
            name: "A=1; touch marker; B".to_string(),
            value: "x".to_string(),
        })
        .build();
    registry
        .insert(Check {
            name: "env".to_string(),
            description: "exports a variable".to_string(),
            sequence,
            sandboxed: false,
            mutates_checkout: false,
        })
        .unwrap();

    let err = compile(&registry).unwrap_err();
    assert_eq!(
        err,
        CompileError::InvalidOperation {
            check: "env".to_string(),
            source: OperationError::InvalidVariableName("A=1; touch marker; B".to_string()),
        }
    );
}

#[test]
fn unsandboxed_check_renders_steps_inline() {
    let mut config = CiConfig::from_yaml_str("version: 1\n").unwrap();
    config.checks.push(
        "docs",
        CheckSpec {
            description: "docs build".to_string(),
            sandbox: false,
            mutates_checkout: false,
            commands: vec![
                OperationSpec {
                    cd: Some("docs dir".into()),
                    ..OperationSpec::default()
                },
                OperationSpec {
                    all: Some(vec![
                        vec!["make".to_string(), "html".to_string()],
                        vec!["make".to_string(), "linkcheck".to_string()],
                    ]),
                    ..OperationSpec::default()
                },
            ],
        },
    );
    let suite = compile(&build_registry(&config).unwrap()).unwrap();
    let body: Vec<_> = suite.blocks()[0].text.lines().collect();
    assert_eq!(body[0], "@test \"docs build\" {");
    assert_eq!(body[1], "  cd 'docs dir' || return $?");
    assert!(body[2].starts_with("  { __ci_status=0; make html || "));
    assert!(body[2].ends_with("(exit \"$__ci_status\"); } || return $?"));
    assert_eq!(body[3], "}");
}

#[test]
fn empty_registry_compiles_to_header_only() {
    let suite = compile(&CheckRegistry::new()).unwrap();
    assert_eq!(suite.as_str(), SUITE_HEADER);
    assert!(suite.blocks().is_empty());
}

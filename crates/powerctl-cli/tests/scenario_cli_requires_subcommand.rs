use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn cli_without_subcommand_prints_usage_and_fails() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("powerctl")?;
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
    Ok(())
}

#[test]
fn cli_transition_requires_at_least_one_node() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("powerctl")?;
    cmd.args(["transition", "--operation", "PowerOn", "--requested-by", "test"]);
    cmd.assert().failure();
    Ok(())
}

#[test]
fn cli_status_requires_a_valid_uuid() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("powerctl")?;
    cmd.args(["status", "not-a-uuid"]);
    cmd.assert().failure().stderr(predicate::str::contains("invalid value"));
    Ok(())
}

use assert_cmd::Command;
use predicates::prelude::*;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_file(directory: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = directory.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn two_var_dictionary(directory: &Path) -> std::path::PathBuf {
    write_file(
        directory,
        "pair.kdic",
        "Dictionary Pair\n{\n    Categorical X;\n    Categorical Y;\n};\n",
    )
}

/// Y = f(X): a 10-to-1 surjection from 40 X symbols onto 4 Y symbols.
fn dependent_data() -> String {
    let mut data = String::from("X\tY\n");
    for row in 0..4000u32 {
        let x = row % 40;
        writeln!(data, "x{:02}\ty{}", x, x % 4).unwrap();
    }
    data
}

/// X and Y independent uniform over 20 symbols each.
fn independent_data() -> String {
    let mut data = String::from("X\tY\n");
    for row in 0..4000u32 {
        // Decorrelated walks over the two alphabets.
        writeln!(data, "x{:02}\ty{:02}", row % 20, (row / 20) % 20).unwrap();
    }
    data
}

#[test]
fn dependent_pair_yields_matching_groups() {
    let directory = tempdir().unwrap();
    let dictionary = two_var_dictionary(directory.path());
    let data = write_file(directory.path(), "pair.txt", &dependent_data());
    let report = directory.path().join("pair.khc");

    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            dictionary.to_str().unwrap(),
            "Pair",
            "-i",
            data.to_str().unwrap(),
            "-o",
            report.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Read 4000 records (0 skipped)"))
        .stdout(predicate::str::contains("Coclustering report written"));

    let parsed = grain_io::read_report(&report).unwrap();
    parsed.check_hierarchy().unwrap();
    assert!(parsed.level() > 0.1, "level {} too low", parsed.level());

    // X collapses onto the 4 preimages of f; Y keeps its 4 symbols.
    let x = parsed.attribute_by_name("X").unwrap();
    let y = parsed.attribute_by_name("Y").unwrap();
    assert_eq!(x.leaf_count(), 4);
    assert_eq!(y.leaf_count(), 4);

    // Each X group holds exactly the 10 preimages of one Y symbol.
    for leaf in x.leaf_ids() {
        let node = x.node(leaf);
        let Some(grain_core::NodeContent::ValueSet { values, .. }) = &node.content else {
            panic!("categorical leaf without a value set");
        };
        assert_eq!(values.len(), 10);
        let classes: std::collections::HashSet<&str> = values
            .iter()
            .map(|value| {
                let index: u32 = value.name[1..].parse().unwrap();
                ["y0", "y1", "y2", "y3"][(index % 4) as usize]
            })
            .collect();
        assert_eq!(classes.len(), 1, "group mixes preimages: {:?}", values);
    }

    // The JSON twin is written next to the report.
    assert!(directory.path().join("pair.khcj").exists());
}

#[test]
fn independent_pair_is_not_informative() {
    let directory = tempdir().unwrap();
    let dictionary = two_var_dictionary(directory.path());
    let data = write_file(directory.path(), "pair.txt", &independent_data());
    let report = directory.path().join("pair.khc");

    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            dictionary.to_str().unwrap(),
            "Pair",
            "-i",
            data.to_str().unwrap(),
            "-o",
            report.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("not informative"));

    // The empty report still exists and parses.
    let parsed = grain_io::read_report(&report).unwrap();
    assert!(parsed.attributes.is_empty());
    assert!(parsed.level().abs() < 0.02);
}

#[test]
fn empty_database_exits_zero_with_empty_report() {
    let directory = tempdir().unwrap();
    let dictionary = two_var_dictionary(directory.path());
    let data = write_file(directory.path(), "pair.txt", "X\tY\n");
    let report = directory.path().join("pair.khc");

    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            dictionary.to_str().unwrap(),
            "Pair",
            "-i",
            data.to_str().unwrap(),
            "-o",
            report.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Read 0 records"))
        .stdout(predicate::str::contains("not informative"));
    assert!(report.exists());
}

#[test]
fn numeric_attribute_keeps_descriptive_bounds() {
    let directory = tempdir().unwrap();
    let dictionary = write_file(
        directory.path(),
        "people.kdic",
        "Dictionary People\n{\n    Numerical age;\n    Categorical class;\n};\n",
    );
    // Three age clusters mapped to three classes, ages spanning [17, 90].
    let mut data = String::from("age\tclass\n");
    for row in 0..600u32 {
        let (age, class) = match row % 3 {
            0 => (17 + row % 12, "young"),
            1 => (40 + row % 12, "middle"),
            _ => (79 + row % 12, "senior"),
        };
        writeln!(data, "{}\t{}", age, class).unwrap();
    }
    let data = write_file(directory.path(), "people.txt", &data);
    let report = directory.path().join("people.khc");

    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            dictionary.to_str().unwrap(),
            "People",
            "-i",
            data.to_str().unwrap(),
            "-o",
            report.to_str().unwrap(),
        ])
        .assert()
        .success();

    let parsed = grain_io::read_report(&report).unwrap();
    let age = parsed.attribute_by_name("age").unwrap();
    assert_eq!(age.min, Some(17.0));
    assert_eq!(age.max, Some(90.0));
    assert!(age.leaf_count() >= 3);
    assert!(parsed.attribute_by_name("class").unwrap().leaf_count() >= 3);
    assert!(parsed.level() > 0.1);
}

#[test]
fn frequency_variable_and_error_log() {
    let directory = tempdir().unwrap();
    let dictionary = write_file(
        directory.path(),
        "w.kdic",
        "Dictionary W\n{\n    Categorical X;\n    Categorical Y;\n    Numerical Weight;\n};\n",
    );
    let mut data = String::from("X\tY\tWeight\n");
    for row in 0..40u32 {
        let x = row % 8;
        // One malformed weight per alphabet pass.
        let weight = if row == 13 { "-2".to_string() } else { "100".to_string() };
        writeln!(data, "x{}\ty{}\t{}", x, x % 2, weight).unwrap();
    }
    let data = write_file(directory.path(), "w.txt", &data);
    let report = directory.path().join("w.khc");
    let log = directory.path().join("w.log");

    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            dictionary.to_str().unwrap(),
            "W",
            "-i",
            data.to_str().unwrap(),
            "-o",
            report.to_str().unwrap(),
            "-e",
            log.to_str().unwrap(),
            "--frequency",
            "Weight",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Read 39 records (1 skipped)"));

    let log_content = fs::read_to_string(&log).unwrap();
    assert!(log_content.contains("not positive"));
}

#[test]
fn missing_dictionary_file_fails() {
    let directory = tempdir().unwrap();
    let data = write_file(directory.path(), "pair.txt", "X\tY\na\tb\n");
    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            directory.path().join("absent.kdic").to_str().unwrap(),
            "Pair",
            "-i",
            data.to_str().unwrap(),
            "-o",
            directory.path().join("out.khc").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn unknown_dictionary_name_fails() {
    let directory = tempdir().unwrap();
    let dictionary = two_var_dictionary(directory.path());
    let data = write_file(directory.path(), "pair.txt", "X\tY\na\tb\n");
    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            dictionary.to_str().unwrap(),
            "Adult",
            "-i",
            data.to_str().unwrap(),
            "-o",
            directory.path().join("out.khc").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not declared"));
}

#[test]
fn exhausted_time_budget_still_exits_cleanly() {
    let directory = tempdir().unwrap();
    let dictionary = two_var_dictionary(directory.path());
    let data = write_file(directory.path(), "pair.txt", &dependent_data());
    let report = directory.path().join("pair.khc");

    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            dictionary.to_str().unwrap(),
            "Pair",
            "-i",
            data.to_str().unwrap(),
            "-o",
            report.to_str().unwrap(),
            "--time",
            "0",
        ])
        .assert()
        .success();
    // Whatever the budget allowed, the report on disk is complete.
    assert!(report.exists());
    grain_io::read_report(&report).unwrap();
}

#[test]
fn comma_separated_files_are_read() {
    let directory = tempdir().unwrap();
    let dictionary = two_var_dictionary(directory.path());
    let data = write_file(
        directory.path(),
        "pair.csv",
        &dependent_data().replace('\t', ","),
    );
    let report = directory.path().join("pair.khc");

    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            dictionary.to_str().unwrap(),
            "Pair",
            "-i",
            data.to_str().unwrap(),
            "-o",
            report.to_str().unwrap(),
            "-f",
            ",",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Read 4000 records"));
}

#[test]
fn instances_variables_mode_produces_a_report() {
    let directory = tempdir().unwrap();
    let dictionary = write_file(
        directory.path(),
        "iv.kdic",
        "Dictionary IV\n{\n    Categorical Id;\n    Categorical M1;\n    Categorical M2;\n};\n",
    );
    let mut data = String::from("Id\tM1\tM2\n");
    for row in 0..64u32 {
        let (m1, m2) = if row % 2 == 0 { ("a", "u") } else { ("b", "v") };
        writeln!(data, "row{:02}\t{}\t{}", row, m1, m2).unwrap();
    }
    let data = write_file(directory.path(), "iv.txt", &data);
    let report = directory.path().join("iv.khc");

    Command::cargo_bin("grain")
        .unwrap()
        .args([
            "-d",
            dictionary.to_str().unwrap(),
            "IV",
            "-i",
            data.to_str().unwrap(),
            "-o",
            report.to_str().unwrap(),
            "--identifier",
            "Id",
            "--inner",
            "M1",
            "--inner",
            "M2",
        ])
        .assert()
        .success();

    let parsed = grain_io::read_report(&report).unwrap();
    assert_eq!(parsed.identifier_attribute_name.as_deref(), Some("Id"));
    assert!(parsed.attribute_by_name("VariableParts").is_some());
}

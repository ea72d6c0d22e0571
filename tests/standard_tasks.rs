use std::path::{Path, PathBuf};

use assetpipe::{standard_graph, BuildContext, BuildMode, Config, Runner, RunnerOptions, TaskStatus};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

fn runner(root: &Path, config: &Config, mode: BuildMode) -> Runner {
    let ctx = BuildContext::new(root, mode, 4);
    let graph = standard_graph(config, &ctx).unwrap();
    let options = RunnerOptions {
        quiet: true,
        ..RunnerOptions::default()
    };
    Runner::new(graph, root, options)
}

fn scripts_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/js/a.js", "function greet(name) {\n  return 'hi ' + name;\n}\n");
    write(dir.path(), "src/js/vendors/b.js", "var vendorValue = 42;\n");
    write(dir.path(), "src/js/c.js", "greet('c');\n");
    dir
}

#[tokio::test]
async fn scripts_bundle_vendor_and_app_separately() {
    let dir = scripts_project();
    let report = runner(dir.path(), &Config::default(), BuildMode::Development)
        .run(&["scripts"])
        .await
        .unwrap();
    assert!(report.is_success());

    assert_eq!(read(dir.path(), "src/js/vendors.js"), "var vendorValue = 42;\n");

    let app = read(dir.path(), "src/js/enlBase.js");
    let a = app.find("greet(name)").unwrap();
    let c = app.find("greet('c')").unwrap();
    assert!(a < c);
    assert!(!app.contains("vendorValue"));
    assert!(app.contains(";\r\n"));
    assert!(app.contains("//# sourceMappingURL=enlBase.js.map"));

    let map: serde_json::Value =
        serde_json::from_str(&read(dir.path(), "src/js/enlBase.js.map")).unwrap();
    assert_eq!(map["sources"], serde_json::json!(["a.js", "c.js"]));
}

#[tokio::test]
async fn production_scripts_are_minified_without_maps() {
    let dir = scripts_project();
    let report = runner(dir.path(), &Config::default(), BuildMode::Production)
        .run(&["scripts"])
        .await
        .unwrap();
    assert!(report.is_success());

    let app = read(dir.path(), "src/js/enlBase.js");
    assert!(!app.contains("sourceMappingURL"));
    assert!(!app.contains("\n  return"));
    assert!(!dir.path().join("src/js/enlBase.js.map").exists());

    let vendors = read(dir.path(), "src/js/vendors.js");
    assert!(vendors.len() < "var vendorValue = 42;\n".len());
}

#[tokio::test]
async fn rerunning_scripts_is_idempotent() {
    let dir = scripts_project();
    let runner = runner(dir.path(), &Config::default(), BuildMode::Development);

    runner.run(&["scripts"]).await.unwrap().into_result().unwrap();
    let first = (read(dir.path(), "src/js/vendors.js"), read(dir.path(), "src/js/enlBase.js"));

    runner.run(&["scripts"]).await.unwrap().into_result().unwrap();
    let second = (read(dir.path(), "src/js/vendors.js"), read(dir.path(), "src/js/enlBase.js"));

    assert_eq!(first, second);
}

#[tokio::test]
async fn lint_findings_leave_scripts_successful() {
    let dir = scripts_project();
    write(dir.path(), "src/js/debug.js", "debugger;\n");
    write(dir.path(), "src/js/vendors/noisy.js", "debugger;\n");

    let report = runner(dir.path(), &Config::default(), BuildMode::Development)
        .run(&["scripts"])
        .await
        .unwrap();
    assert!(report.is_success());

    let scripts = report.tasks.iter().find(|t| t.name == "scripts").unwrap();
    let lint = &scripts.report.as_ref().unwrap().lint;
    assert_eq!(lint.len(), 1);
    assert!(lint[0].path.ends_with("debug.js"));
}

#[tokio::test]
async fn watch_is_inert_in_production() {
    let dir = scripts_project();
    let report = runner(dir.path(), &Config::default(), BuildMode::Production)
        .run(&["watch"])
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(report.watch_bindings.is_empty());

    let ran: Vec<&str> = report.tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(ran, vec!["watch"]);
    assert!(!dir.path().join("src/js/enlBase.js").exists());
    assert!(!dir.path().join("src/js/vendors.js").exists());

    let report = runner(dir.path(), &Config::default(), BuildMode::Development)
        .run(&["build"])
        .await
        .unwrap();
    // build skips watch, so nothing is bound
    assert!(report.watch_bindings.is_empty());
}

#[cfg(unix)]
mod styles {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Stand-in compiler: echoes its input, or fails like Dart Sass on an
    /// unclosed block.
    fn fake_sass(dir: &Path) -> PathBuf {
        let path = dir.join("fake-sass");
        let script = r#"#!/bin/sh
input=$(cat)
case "$input" in
  *"}"*) printf '%s\n' "$input" ;;
  *) echo 'Error: expected "}".' >&2
     echo '  - 1:4  root stylesheet' >&2
     exit 65 ;;
esac
"#;
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config(tools_dir: &Path) -> Config {
        let mut config = Config::default();
        config.tools.sass = fake_sass(tools_dir).to_string_lossy().into_owned();
        config
    }

    #[tokio::test]
    async fn syntax_error_fails_only_that_file() {
        let tools = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/css/sass/good.scss", ".a { color: red; }");
        write(dir.path(), "src/css/sass/bad.scss", ".a {");
        write(dir.path(), "src/css/sass/_vars.scss", ".partial { color: blue; }");

        let report = runner(dir.path(), &config(tools.path()), BuildMode::Development)
            .run(&["styles"])
            .await
            .unwrap();

        assert_eq!(report.status_of("styles"), Some(TaskStatus::Failed));
        let result = &report.tasks[0].report.as_ref().unwrap().result;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.succeeded, 1);

        let error = &result.errors[0];
        assert_eq!(error.plugin, "sass");
        assert!(error.source_path.ends_with("bad.scss"));
        assert_eq!((error.line, error.column), (Some(1), Some(4)));

        let good = read(dir.path(), "src/css/good.css");
        assert!(good.contains("color: red"));
        assert!(good.contains("/*# sourceMappingURL=good.css.map */"));
        assert!(!dir.path().join("src/css/bad.css").exists());
        assert!(!dir.path().join("src/css/_vars.css").exists());
    }

    #[tokio::test]
    async fn failed_styles_skip_dependents_but_not_scripts() {
        let tools = TempDir::new().unwrap();
        let dir = scripts_project();
        write(dir.path(), "src/css/sass/bad.scss", ".a {");

        let report = runner(dir.path(), &config(tools.path()), BuildMode::Development)
            .run(&["build"])
            .await
            .unwrap();

        assert_eq!(report.status_of("styles"), Some(TaskStatus::Failed));
        assert_eq!(report.status_of("scripts"), Some(TaskStatus::Succeeded));
        assert_eq!(report.status_of("build"), Some(TaskStatus::Skipped));
        assert!(dir.path().join("src/js/enlBase.js").exists());
    }

    #[tokio::test]
    async fn failed_styles_still_bind_watch() {
        let tools = TempDir::new().unwrap();
        let dir = scripts_project();
        write(dir.path(), "src/css/sass/bad.scss", ".a {");

        let report = runner(dir.path(), &config(tools.path()), BuildMode::Development)
            .run(&["default"])
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.status_of("styles"), Some(TaskStatus::Failed));
        assert_eq!(report.status_of("watch"), Some(TaskStatus::Succeeded));
        assert_eq!(report.status_of("default"), Some(TaskStatus::Skipped));
        assert_eq!(report.watch_bindings.len(), 2);
    }

    #[tokio::test]
    async fn production_styles_are_compressed_without_maps() {
        let tools = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/css/sass/main.scss", ".a {\n  color: red;\n}\n");

        let report = runner(dir.path(), &config(tools.path()), BuildMode::Production)
            .run(&["styles"])
            .await
            .unwrap();
        assert!(report.is_success());

        assert_eq!(read(dir.path(), "src/css/main.css"), ".a{color:red}");
        assert!(!dir.path().join("src/css/main.css.map").exists());
    }
}

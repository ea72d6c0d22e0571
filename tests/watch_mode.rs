use std::path::Path;
use std::time::Duration;

use assetpipe::watch::watch_and_run;
use assetpipe::{standard_graph, BuildContext, BuildMode, Config, Runner, RunnerOptions, TaskEvent, TaskStatus};
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn runner(root: &Path) -> Runner {
    let ctx = BuildContext::new(root, BuildMode::Development, 2);
    let graph = standard_graph(&Config::default(), &ctx).unwrap();
    let options = RunnerOptions {
        quiet: true,
        ..RunnerOptions::default()
    };
    Runner::new(graph, root, options)
}

fn is_scripts_start(event: &TaskEvent) -> bool {
    matches!(event, TaskEvent::Started { task } if task == "scripts")
}

#[tokio::test]
async fn source_change_reruns_scripts_once() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    write(&root, "src/js/a.js", "function greet(name) {\n  return 'hi ' + name;\n}\n");
    write(&root, "src/js/vendors/b.js", "var vendorValue = 42;\n");

    let runner = runner(&root);
    let report = runner.run(&["watch"]).await.unwrap();
    assert_eq!(report.watch_bindings.len(), 2);

    let mut events = runner.subscribe();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let watching = tokio::spawn(watch_and_run(
        runner.clone(),
        report.watch_bindings,
        Duration::from_millis(100),
        async move {
            let _ = stopped.await;
        },
    ));

    // Let the watcher register and hash the tree before editing
    tokio::time::sleep(Duration::from_millis(500)).await;
    write(&root, "src/js/a.js", "function greet(name) {\n  return 'hello ' + name;\n}\n");

    let mut starts = 0;
    let status = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            if is_scripts_start(&event) {
                starts += 1;
            }
            if let TaskEvent::Finished { task, status } = event {
                if task == "scripts" {
                    return status;
                }
            }
        }
    })
    .await
    .expect("scripts re-ran after the edit");
    assert_eq!(status, TaskStatus::Succeeded);

    let app = std::fs::read_to_string(root.join("src/js/enlBase.js")).unwrap();
    assert!(app.contains("'hello '"));

    // The bundles just written sit in the watched tree and must not echo
    tokio::time::sleep(Duration::from_millis(800)).await;
    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), watching)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    loop {
        match events.try_recv() {
            Ok(event) if is_scripts_start(&event) => starts += 1,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn identical_save_does_not_rerun() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let source = "var a = 1;\n";
    write(&root, "src/js/a.js", source);

    let runner = runner(&root);
    let report = runner.run(&["watch"]).await.unwrap();

    let mut events = runner.subscribe();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let watching = tokio::spawn(watch_and_run(
        runner.clone(),
        report.watch_bindings,
        Duration::from_millis(100),
        async move {
            let _ = stopped.await;
        },
    ));

    tokio::time::sleep(Duration::from_millis(500)).await;
    write(&root, "src/js/a.js", source);
    tokio::time::sleep(Duration::from_millis(800)).await;

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), watching)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert!(!root.join("src/js/enlBase.js").exists());
}

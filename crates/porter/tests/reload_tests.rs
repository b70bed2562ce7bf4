//! Invalidation after source edits.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{Project, defines, dev_code};

/// Longer than the reload debounce window.
const SETTLE: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_edit_clears_only_bundles_containing_the_module() {
    let project = Project::new();
    project.component("home.js", "module.exports = require('./greeting');\n");
    project.component("about.js", "module.exports = require('./footer');\n");
    let greeting = project.component("greeting.js", "module.exports = 'hello';\n");
    project.component("footer.js", "module.exports = 'footer';\n");

    let porter = project.porter(&["home.js", "about.js"]);
    porter.ready(false).await.unwrap();
    let home = porter.bundle("home.js").unwrap();
    let about = porter.bundle("about.js").unwrap();
    let about_code = about.code().unwrap();
    assert!(home.has_code());

    project.component(
        "greeting.js",
        "module.exports = 'hello' + require('./extra');\n",
    );
    project.component("extra.js", "module.exports = '!';\n");
    porter.handle_change(&greeting).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    assert!(home.code().is_none());
    assert!(Arc::ptr_eq(&about.code().unwrap(), &about_code));

    // the next request rebuilds with the new dependency
    let code = dev_code(&porter, "home.js").await;
    assert_eq!(defines(&code, "extra.js"), 1);
    assert!(code.contains("'hello' + require('./extra')"));
}

#[tokio::test]
async fn test_unknown_path_is_ignored() {
    let project = Project::new();
    project.component("home.js", "module.exports = 1;\n");
    let stray = project.component("stray.js", "module.exports = 2;\n");

    let porter = project.porter(&["home.js"]);
    porter.ready(false).await.unwrap();
    let home = porter.bundle("home.js").unwrap();

    porter.handle_change(&stray).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    assert!(home.has_code());
}

#[tokio::test]
async fn test_watch_is_idempotent() {
    let project = Project::new();
    project.component("home.js", "module.exports = 1;\n");

    let porter = project.porter(&["home.js"]);
    porter.watch().await.unwrap();
    porter.watch().await.unwrap();
    porter.destroy();
    porter.destroy();
}

/// Shorter than the reload debounce window.
const BURST_GAP: Duration = Duration::from_millis(60);

#[tokio::test]
async fn test_burst_of_edits_clears_once_after_quiet() {
    let project = Project::new();
    project.component("home.js", "module.exports = require('./greeting');\n");
    let greeting = project.component("greeting.js", "module.exports = 'v0';\n");

    let porter = project.porter(&["home.js"]);
    porter.ready(false).await.unwrap();
    let home = porter.bundle("home.js").unwrap();

    for version in 1..=3 {
        project.component("greeting.js", &format!("module.exports = 'v{version}';\n"));
        porter.handle_change(&greeting).await.unwrap();
        tokio::time::sleep(BURST_GAP).await;
    }
    // each edit pushed the rebuild back
    assert!(home.has_code());

    tokio::time::sleep(SETTLE).await;
    assert!(home.code().is_none());

    let code = dev_code(&porter, "home.js").await;
    assert!(code.contains("'v3'"));
}

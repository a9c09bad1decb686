//! Runs the pause-dialog detector against an HTML file or a live URL and
//! prints what a page agent would have seen and clicked. Debugging aid for
//! selector drift; build with `--features dev-tools`.

use anyhow::{bail, Result};
use auto_encore::detect::{detect, find_dismissal, PageSnapshot};

#[tokio::main]
async fn main() -> Result<()> {
    let Some(target) = std::env::args().nth(1) else {
        bail!("usage: sweep-probe <file.html | http(s)://url>");
    };

    let html = if target.starts_with("http://") || target.starts_with("https://") {
        reqwest::get(&target).await?.text().await?
    } else {
        std::fs::read_to_string(&target)?
    };

    let snapshot = PageSnapshot::from_html(&html);
    println!("=== sweep-probe: {} ===", target);
    println!(
        "html: {} bytes, text: {} chars",
        snapshot.html().len(),
        snapshot.text().len()
    );

    match detect(&snapshot) {
        Some(sighting) => {
            println!("pause dialog: YES");
            if let Some(text) = &sighting.matched_text {
                println!("  phrase: {:?}", text);
            }
            if let Some(container) = &sighting.matched_container {
                println!("  container: {}", container);
            }
        }
        None => println!("pause dialog: no"),
    }

    match find_dismissal(&snapshot) {
        Some(plan) => {
            println!("dismissal plan: {} -> {}", plan.strategy, plan.selector);
            if let Some(scope) = &plan.scope {
                println!("  scope: {}", scope);
            }
            if let Some(needle) = &plan.needle {
                println!("  needle: {}", needle);
            }
            println!("  would click: {:?}", plan.matched_text);
        }
        None => println!("dismissal plan: none"),
    }

    Ok(())
}

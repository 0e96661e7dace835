//! Scripted call through the keyword oracles: prints each decision as the
//! conversation escalates. Alerts go to the log channel unless configured.

use std::sync::Arc;

use call_guard::blocklist::{Blocklist, SuspiciousNumberStore};
use call_guard::notify::{dispatcher::ContactAlertDispatcher, LogNotifier};
use call_guard::oracle::{mock::KeywordOracle, OraclePorts};
use call_guard::{DecisionEngine, GuardConfig, SessionState, Turn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(true).init();

    let numbers = Arc::new(Blocklist::in_memory());
    let oracle = Arc::new(KeywordOracle::default());
    let ports = OraclePorts {
        classifier: oracle.clone(),
        questions: oracle.clone(),
        speakers: oracle.clone(),
        alerts: Arc::new(ContactAlertDispatcher::new(Arc::new(LogNotifier), numbers.clone())),
        companion: oracle,
    };
    let engine = DecisionEngine::new(&ports, &GuardConfig::default());
    let mut session = SessionState::new(Some("+1 555 010 9999".into()), vec!["+15550001111".into()]);

    let script = [
        Turn::caller("Grandma, it's me, your grandson."),
        Turn::user("Oh hello dear, is everything alright?"),
        Turn::caller("I'm in jail and I need bail money, it's urgent."),
        Turn::caller("Please buy a gift card and don't tell mom."),
        Turn::caller("Read me the numbers on the gift card immediately."),
    ];

    for turn in script {
        println!("{turn}");
        let d = engine.process_turn(turn, &mut session).await;
        println!("  -> {}", serde_json::to_string(&d)?);
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    }

    let lookup = numbers.check("+15550109999").await?;
    println!("blocklist: found={} reports={}", lookup.found, lookup.report_count);
    println!("call-demo done");
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::availability::AvailabilityOracle;
use crate::calendar::{HttpCalendar, ResponseCache};
use crate::config::AppConfig;
use crate::coordinator::Coordinator;
use crate::dispatcher::TaskDispatcher;
use crate::extract::OpenAiExtractor;
use crate::intent::IntentParser;
use crate::notify::TwilioSms;
use crate::reminder::ReminderScheduler;
use crate::store::{self, EventStore, ProfileStore, SelectionStore, TaskStore};
use crate::traits::{
    CalendarAvailability, CalendarMutator, Clock, Notifier, SystemClock, TextExtractor,
};
use crate::transport;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 1. State store
    let pool = store::open_db(&config.state.db_path).await?;
    info!("State store initialized ({})", config.state.db_path);

    // 2. Clock
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 3. External collaborators
    let extractor: Arc<dyn TextExtractor> = Arc::new(OpenAiExtractor::new(&config.extractor)?);
    let notifier: Arc<dyn Notifier> = Arc::new(TwilioSms::new(&config.sms)?);
    let cache = ResponseCache::new(Duration::from_secs(config.calendar.cache_ttl_secs));
    let calendar = Arc::new(HttpCalendar::new(&config.calendar.base_url, cache)?);

    // 4. Stores + scheduler
    let profiles = ProfileStore::new(pool.clone());
    let tasks = TaskStore::new(pool.clone());
    let selections = SelectionStore::new(pool.clone());
    let scheduler = Arc::new(ReminderScheduler::new(tasks.clone(), clock.clone()));
    let events = Arc::new(EventStore::new(
        pool,
        scheduler,
        calendar.clone() as Arc<dyn CalendarMutator>,
        clock.clone(),
    ));

    // 5. Coordinator
    let coordinator = Arc::new(Coordinator::new(
        profiles.clone(),
        events.clone(),
        selections,
        IntentParser::new(extractor),
        AvailabilityOracle::new(calendar as Arc<dyn CalendarAvailability>),
        clock.clone(),
        config.reminders.default_minutes,
        config.selection.ttl_secs,
    ));

    // 6. Background dispatcher
    let dispatcher = Arc::new(TaskDispatcher::new(
        tasks,
        events,
        profiles,
        notifier,
        clock,
        Duration::from_secs(config.dispatcher.tick_interval_secs),
        Duration::from_secs(config.dispatcher.error_backoff_secs),
        Duration::from_secs(config.dispatcher.notify_timeout_secs),
    ));
    dispatcher.spawn();

    // 7. HTTP transport (blocks)
    info!("Starting smscal v{}", env!("CARGO_PKG_VERSION"));
    transport::serve(coordinator, &config.http.bind, config.http.port).await
}

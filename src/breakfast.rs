//! Breakfast demo
//!
//! Pours coffee, then fries eggs and bacon and makes toast concurrently,
//! announcing each dish as it comes off the stove. Juice is poured only once
//! everything else is on the table.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::coord::{Chain, Coordinator, EpisodeOutput, Job, JobOutcome, LoggingObserver};
use crate::core::config::CoordinatorConfig;
use crate::core::errors::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coffee {
    pub is_fresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Egg {
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bacon {
    pub slices: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Toast {
    pub slices: u32,
    pub toppings: Vec<String>,
}

impl Toast {
    pub fn add_topping(&mut self, topping: impl Into<String>) {
        self.toppings.push(topping.into());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Juice {
    pub name: String,
}

/// How long each cooking step takes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KitchenTimings {
    pub warm_pan: Duration,
    pub cook_eggs: Duration,
    pub bacon_side: Duration,
    pub toast: Duration,
}

impl Default for KitchenTimings {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(3))
    }
}

impl KitchenTimings {
    pub fn uniform(step: Duration) -> Self {
        Self {
            warm_pan: step,
            cook_eggs: step,
            bacon_side: step,
            toast: step,
        }
    }
}

/// Everything that made it to the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakfast {
    pub coffee: Coffee,
    pub eggs: Option<Egg>,
    pub bacon: Option<Bacon>,
    pub toast: Option<Toast>,
    pub juice: Juice,
}

pub fn pour_coffee() -> Coffee {
    Coffee { is_fresh: true }
}

pub fn pour_oj() -> Juice {
    Juice {
        name: "Orange Juice".to_string(),
    }
}

pub async fn fry_eggs(count: u32, timings: KitchenTimings) -> anyhow::Result<Egg> {
    info!("Warming the egg pan...");
    tokio::time::sleep(timings.warm_pan).await;
    info!("cracking {} eggs", count);
    info!("cooking the eggs ...");
    tokio::time::sleep(timings.cook_eggs).await;
    info!("Put eggs on plate");
    Ok(Egg { count })
}

pub async fn fry_bacon(slices: u32, timings: KitchenTimings) -> anyhow::Result<Bacon> {
    info!("putting {} slices of bacon in the pan", slices);
    info!("cooking first side of bacon...");
    tokio::time::sleep(timings.bacon_side).await;
    for _ in 0..slices {
        info!("flipping a slice of bacon");
    }
    info!("cooking the second side of the bacon...");
    tokio::time::sleep(timings.bacon_side).await;
    info!("Putting bacon on a plate");
    Ok(Bacon { slices })
}

pub async fn toast_bread(slices: u32, timings: KitchenTimings) -> anyhow::Result<Toast> {
    for _ in 0..slices {
        info!("Putting bread slice into toaster");
    }
    info!("Toasting");
    tokio::time::sleep(timings.toast).await;
    info!("Removing toast from toaster");
    Ok(Toast {
        slices,
        toppings: Vec::new(),
    })
}

pub fn apply_butter(mut toast: Toast) -> anyhow::Result<Toast> {
    info!("Buttering up the toast");
    toast.add_topping("Butter");
    Ok(toast)
}

pub fn apply_jam(mut toast: Toast) -> anyhow::Result<Toast> {
    info!("Jamming up the toast");
    toast.add_topping("Jam");
    Ok(toast)
}

/// toast → butter → jam
pub fn toast_with_butter_and_jam(slices: u32, timings: KitchenTimings) -> Chain<Toast> {
    Chain::first("toast", toast_bread(slices, timings))
        .then_sync("butter", apply_butter)
        .then_sync("jam", apply_jam)
}

#[derive(Default)]
struct Plate {
    eggs: Option<Egg>,
    bacon: Option<Bacon>,
    toast: Option<Toast>,
}

fn serve<T>(plate: &Arc<Mutex<Plate>>, announce: &'static str, outcome: JobOutcome<T>, put: fn(&mut Plate, T)) {
    match outcome {
        Ok(dish) => {
            info!("{}", announce);
            let mut plate = plate.lock().unwrap_or_else(|p| p.into_inner());
            put(&mut plate, dish);
        }
        Err(e) => warn!("{} never happened: {}", announce, e),
    }
}

/// Make breakfast: one coordination episode with the three stove jobs
pub async fn make_breakfast(
    config: CoordinatorConfig,
    timings: KitchenTimings,
) -> Result<EpisodeOutput<Breakfast>> {
    let coffee = pour_coffee();
    info!(
        "Coffee has been poured and is {}",
        if coffee.is_fresh { "fresh" } else { "not fresh" }
    );

    let plate = Arc::new(Mutex::new(Plate::default()));
    let mut coordinator = Coordinator::new(config)?;
    coordinator.add_observer(Arc::new(LoggingObserver));

    let p = plate.clone();
    coordinator.add(Job::new("eggs", fry_eggs(2, timings)), move |outcome| {
        serve(&p, "Eggs are finished", outcome, |plate, eggs| plate.eggs = Some(eggs))
    })?;
    let p = plate.clone();
    coordinator.add(Job::new("bacon", fry_bacon(3, timings)), move |outcome| {
        serve(&p, "Bacon is finished", outcome, |plate, bacon| plate.bacon = Some(bacon))
    })?;
    let p = plate.clone();
    coordinator.add(
        toast_with_butter_and_jam(2, timings).into_job("toast"),
        move |outcome| serve(&p, "Toast has toasted", outcome, |plate, toast| plate.toast = Some(toast)),
    )?;

    coordinator
        .run(move || async move {
            let juice = pour_oj();
            info!("{} is ready", juice.name);
            let mut plate = plate.lock().unwrap_or_else(|p| p.into_inner());
            let breakfast = Breakfast {
                coffee,
                eggs: plate.eggs.take(),
                bacon: plate.bacon.take(),
                toast: plate.toast.take(),
                juice,
            };
            info!("Breakfast is ready");
            Ok(breakfast)
        })
        .await
}

//! kite-domain: contracts and domain types shared by every stage.
//!
//! This crate is the vocabulary of the pipeline — pure data, no IO, no
//! engine logic. Each entity here is owned by exactly one repository in
//! `kite-db`; stages exchange these types and nothing else.

pub mod error;
pub mod forecast;
pub mod market;
pub mod pipeline;
pub mod run;
pub mod trading;

pub use error::EngineError;
pub use forecast::{
    CapBucket, EventType, ForecastEvent, ForecastStats, ForwardPerformance, Prediction, StatsLevel,
};
pub use market::{
    BarInvariantError, Fundamentals, InvestorClass, InvestorFlow, Market, PriceBar, Stock,
    StockStatus,
};
pub use pipeline::{
    PositionAction, QualitySnapshot, RankedStock, SignalSet, TargetPortfolio, TargetPosition,
    UniverseSnapshot, WEIGHT_EPSILON,
};
pub use run::{RunId, RunRecord, Stage};
pub use trading::{Order, OrderSide, OrderStatus, OrderType};

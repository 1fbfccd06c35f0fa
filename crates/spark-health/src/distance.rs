//! # DistanceSorter：按网络距离重排结果
//!
//! ## 意图（Why）
//! - 客户端可指定参考节点，让离它最近的实例排在前面；距离来自外部网络坐标系统，
//!   这里只消费 [`DistanceEstimator`] 契约。
//!
//! ## 契约（What）
//! - 有参考节点时按估算距离稳定升序排列，距离相同按节点名排序；缺少坐标的记录排在最后；
//! - 没有参考节点、或参考节点本身没有坐标时保持原顺序；
//! - 只改变顺序，绝不改变成员。
//!
//! ## 参考实现（How）
//! - [`CoordinateTable`] 以 `DashMap` 保存 Vivaldi 坐标，距离公式与 serf 一致：
//!   欧氏距离加两端高度，再加两端调整量（调整后非正时退回未调整值）。

use std::{cmp::Ordering, sync::Arc};

use dashmap::DashMap;

use crate::model::HealthRecord;

/// 往返时延估算器，单位为秒。
pub trait DistanceEstimator: Send + Sync {
    /// 任一端缺少坐标时返回 `None`。
    fn distance(&self, reference: &str, target: &str) -> Option<f64>;
}

/// 距离排序器。
#[derive(Clone, Copy, Debug, Default)]
pub struct DistanceSorter;

impl DistanceSorter {
    /// 按到 `reference` 的距离重排 `records`。
    pub fn sort<R: HealthRecord>(
        &self,
        estimator: &dyn DistanceEstimator,
        reference: Option<&str>,
        records: &mut Vec<R>,
    ) {
        let Some(reference) = reference else {
            return;
        };
        if estimator.distance(reference, reference).is_none() {
            return;
        }
        let mut keyed: Vec<(f64, R)> = records
            .drain(..)
            .map(|record| {
                let distance = estimator
                    .distance(reference, record.node_name())
                    .unwrap_or(f64::INFINITY);
                (distance, record)
            })
            .collect();
        keyed.sort_by(|(lhs_distance, lhs), (rhs_distance, rhs)| {
            match lhs_distance.total_cmp(rhs_distance) {
                Ordering::Equal => lhs.node_name().cmp(rhs.node_name()),
                unequal => unequal,
            }
        });
        records.extend(keyed.into_iter().map(|(_, record)| record));
    }
}

/// Vivaldi 网络坐标。
#[derive(Clone, Debug, PartialEq)]
pub struct Coordinate {
    pub vec: Vec<f64>,
    pub error: f64,
    pub adjustment: f64,
    pub height: f64,
}

impl Coordinate {
    /// 以欧氏分量构造，误差、调整量与高度取默认值。
    pub fn new(vec: Vec<f64>) -> Self {
        Self {
            vec,
            error: 1.5,
            adjustment: 0.0,
            height: 1.0e-5,
        }
    }

    pub fn with_height(mut self, height: f64) -> Self {
        self.height = height;
        self
    }

    pub fn with_adjustment(mut self, adjustment: f64) -> Self {
        self.adjustment = adjustment;
        self
    }

    /// 两个坐标之间的估算往返时延（秒）；维度不一致时返回 `None`。
    pub fn distance_to(&self, other: &Coordinate) -> Option<f64> {
        if self.vec.len() != other.vec.len() {
            return None;
        }
        let euclidean = self
            .vec
            .iter()
            .zip(&other.vec)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        let raw = euclidean + self.height + other.height;
        let adjusted = raw + self.adjustment + other.adjustment;
        Some(if adjusted > 0.0 { adjusted } else { raw })
    }
}

/// 节点名到坐标的并发表。
#[derive(Debug, Default)]
pub struct CoordinateTable {
    coordinates: DashMap<Arc<str>, Coordinate>,
}

impl CoordinateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或替换节点坐标。
    pub fn update(&self, node: &str, coordinate: Coordinate) {
        self.coordinates.insert(Arc::from(node), coordinate);
    }

    pub fn remove(&self, node: &str) -> Option<Coordinate> {
        self.coordinates.remove(node).map(|(_, coordinate)| coordinate)
    }

    pub fn get(&self, node: &str) -> Option<Coordinate> {
        self.coordinates.get(node).map(|entry| entry.value().clone())
    }
}

impl DistanceEstimator for CoordinateTable {
    fn distance(&self, reference: &str, target: &str) -> Option<f64> {
        // 先复制参考坐标再取目标，避免同一分片上同时持有两个读守卫。
        let reference = self.get(reference)?;
        let target = self.coordinates.get(target)?;
        reference.distance_to(&target)
    }
}

/// 不提供任何坐标，所有排序请求都保持原顺序。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCoordinates;

impl DistanceEstimator for NoCoordinates {
    fn distance(&self, _reference: &str, _target: &str) -> Option<f64> {
        None
    }
}

//! Métricas por ventana de tiempo (tiempo del evento, no del master).
//!
//! Dos series de buckets: minutos (error rate, latencia promedio) y
//! segundos (requests por segundo). Cada serie guarda como mucho
//! `retention` buckets contando hacia atrás desde el más nuevo.

use chrono::{DateTime, Utc};
use common::{MetricsSnapshot, PartialResult, SecondSample, TimeRange, WindowMetrics};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowBucket {
    /// epoch seconds, múltiplo de `window_size`
    pub window_start: i64,
    pub window_size: u64,
    /// Denominador del error rate: toda línea con timestamp, tenga nivel o no
    pub line_count: u64,
    pub error_count: u64,
    pub request_count: u64,
    pub response_time_sum: f64,
    pub response_time_count: u64,
}

impl WindowBucket {
    fn add(&mut self, c: &SecondSample) {
        self.line_count += c.line_count;
        self.error_count += c.error_count;
        self.request_count += c.request_count;
        self.response_time_sum += c.response_time_sum;
        self.response_time_count += c.response_time_count;
    }

    pub fn error_rate(&self) -> f64 {
        self.error_count as f64 / self.line_count.max(1) as f64
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        self.response_time_sum / self.response_time_count.max(1) as f64
    }

    pub fn requests_per_second(&self) -> f64 {
        self.request_count as f64 / self.window_size.max(1) as f64
    }

    pub fn to_metrics(&self) -> WindowMetrics {
        WindowMetrics {
            window_start: DateTime::<Utc>::from_timestamp(self.window_start, 0).unwrap_or_default(),
            window_size_secs: self.window_size,
            line_count: self.line_count,
            error_count: self.error_count,
            request_count: self.request_count,
            error_rate: self.error_rate(),
            avg_response_time_ms: self.avg_response_time_ms(),
            requests_per_second: self.requests_per_second(),
        }
    }
}

/// Buckets de un mismo tamaño, ordenados por inicio.
#[derive(Debug, Clone)]
pub struct WindowSeries {
    size: i64,
    retention: usize,
    buckets: BTreeMap<i64, WindowBucket>,
    /// Conteos que llegaron para ventanas ya desalojadas
    late_dropped: u64,
}

impl WindowSeries {
    pub fn new(size_secs: u64, retention: usize) -> Self {
        Self {
            size: size_secs.max(1) as i64,
            retention: retention.max(1),
            buckets: BTreeMap::new(),
            late_dropped: 0,
        }
    }

    fn window_start(&self, second: i64) -> i64 {
        second.div_euclid(self.size) * self.size
    }

    fn horizon(&self) -> Option<i64> {
        let newest = *self.buckets.keys().next_back()?;
        Some(newest - (self.retention as i64 - 1) * self.size)
    }

    pub fn add(&mut self, second: i64, counts: &SecondSample) {
        let start = self.window_start(second);
        if let Some(h) = self.horizon() {
            if start < h {
                self.late_dropped += counts.line_count;
                return;
            }
        }

        let size = self.size as u64;
        self.buckets
            .entry(start)
            .or_insert_with(|| WindowBucket {
                window_start: start,
                window_size: size,
                ..Default::default()
            })
            .add(counts);
        self.evict();
    }

    fn evict(&mut self) {
        let Some(h) = self.horizon() else {
            return;
        };
        // split_off deja en `keep` las claves >= h
        let keep = self.buckets.split_off(&h);
        self.buckets = keep;
    }

    /// Reparte `counts`, que cubren `range`, sobre los buckets que se
    /// solapan con el rango, proporcional al solapamiento.
    pub fn add_spread(&mut self, range: &TimeRange, counts: &SecondSample) {
        let start_ms = range.start.timestamp_millis();
        let end_ms = range.end.timestamp_millis();
        let size_ms = self.size * 1000;

        if end_ms <= start_ms {
            self.add(range.start.timestamp(), counts);
            return;
        }

        let total = (end_ms - start_ms) as f64;
        let mut windows: Vec<(i64, f64)> = Vec::new();
        let mut w = self.window_start(range.start.timestamp()) * 1000;
        while w < end_ms {
            let overlap = (w + size_ms).min(end_ms) - w.max(start_ms);
            if overlap > 0 {
                windows.push((w / 1000, overlap as f64 / total));
            }
            w += size_ms;
        }

        let weights: Vec<f64> = windows.iter().map(|(_, f)| *f).collect();
        let lines = apportion(counts.line_count, &weights);
        let errors = apportion(counts.error_count, &weights);
        let requests = apportion(counts.request_count, &weights);
        let rt_counts = apportion(counts.response_time_count, &weights);

        for (i, (second, fraction)) in windows.iter().enumerate() {
            let part = SecondSample {
                second: *second,
                line_count: lines[i],
                error_count: errors[i],
                request_count: requests[i],
                response_time_sum: counts.response_time_sum * fraction,
                response_time_count: rt_counts[i],
            };
            self.add(*second, &part);
        }
    }

    /// (en curso, último completo): el bucket más nuevo y el anterior.
    pub fn latest(&self) -> (Option<&WindowBucket>, Option<&WindowBucket>) {
        let mut it = self.buckets.values().rev();
        (it.next(), it.next())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn late_dropped(&self) -> u64 {
        self.late_dropped
    }

    pub fn buckets(&self) -> impl Iterator<Item = &WindowBucket> {
        self.buckets.values()
    }
}

/// Reparte `total` en partes enteras proporcionales a `weights` (método
/// del mayor resto). La suma de las partes es exactamente `total`.
fn apportion(total: u64, weights: &[f64]) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        let mut out = vec![0; weights.len()];
        out[0] = total;
        return out;
    }

    let exact: Vec<f64> = weights.iter().map(|w| total as f64 * w / sum).collect();
    let mut parts: Vec<u64> = exact.iter().map(|x| x.floor() as u64).collect();
    let assigned: u64 = parts.iter().sum();
    let mut remaining = total.saturating_sub(assigned);

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });
    for i in order.into_iter().cycle() {
        if remaining == 0 {
            break;
        }
        parts[i] += 1;
        remaining -= 1;
    }
    parts
}

pub const MINUTE_SECS: u64 = 60;
pub const SECOND_SECS: u64 = 1;

/// Motor de métricas de un job.
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    minutes: WindowSeries,
    seconds: WindowSeries,
}

impl MetricsEngine {
    pub fn new(minute_retention: usize, second_retention: usize) -> Self {
        Self {
            minutes: WindowSeries::new(MINUTE_SECS, minute_retention),
            seconds: WindowSeries::new(SECOND_SECS, second_retention),
        }
    }

    /// Incorpora un resultado ya aceptado por el agregador.
    ///
    /// Con muestras por segundo cada registro cae en el bucket de su propio
    /// timestamp; sin ellas se reparte proporcionalmente sobre `time_range`.
    pub fn record(&mut self, result: &PartialResult) {
        if !result.samples.is_empty() {
            for s in &result.samples {
                self.minutes.add(s.second, s);
                self.seconds.add(s.second, s);
            }
            return;
        }

        let Some(range) = result.time_range else {
            debug!(
                "resultado de {} sin timestamps: sólo suma a los totales",
                result.task_id
            );
            return;
        };

        let counts = SecondSample {
            second: range.start.timestamp(),
            line_count: result.line_count,
            error_count: result.error_count,
            request_count: result.request_count,
            response_time_sum: result.response_time_sum,
            response_time_count: result.response_time_count,
        };
        self.minutes.add_spread(&range, &counts);
        self.seconds.add_spread(&range, &counts);
    }

    pub fn minutes(&self) -> &WindowSeries {
        &self.minutes
    }

    pub fn seconds(&self) -> &WindowSeries {
        &self.seconds
    }

    /// Valores del último bucket completo y del bucket en curso.
    /// Si todavía no hay bucket completo, los titulares salen del en curso.
    pub fn snapshot(&self, as_of: DateTime<Utc>) -> MetricsSnapshot {
        let (cur_min, last_min) = self.minutes.latest();
        let (cur_sec, last_sec) = self.seconds.latest();

        let headline_min = last_min.or(cur_min);
        let headline_sec = last_sec.or(cur_sec);

        MetricsSnapshot {
            as_of,
            error_rate_per_minute: headline_min.map(|b| b.error_rate()).unwrap_or(0.0),
            avg_response_time_ms: headline_min
                .map(|b| b.avg_response_time_ms())
                .unwrap_or(0.0),
            requests_per_second: headline_sec
                .map(|b| b.requests_per_second())
                .unwrap_or(0.0),
            current_minute: cur_min.map(WindowBucket::to_metrics),
            last_complete_minute: last_min.map(WindowBucket::to_metrics),
            current_second: cur_sec.map(WindowBucket::to_metrics),
            last_complete_second: last_sec.map(WindowBucket::to_metrics),
        }
    }
}

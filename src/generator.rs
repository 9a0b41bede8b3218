//! Synthetic cosmic-muon source
//!
//! Stands in for the transport engine: one downward muon per event, traced
//! in a straight line through the detector. Inside a cell the muon loses
//! energy by ionisation and emits scintillation photons; occasionally it
//! knocks out an electron. Steps are delivered primary first, then
//! secondaries, the order a stacking engine would produce.
//!
//! Every event draws from its own generator seeded by `(seed, event_id)`, so
//! an event is identical whichever worker generates it.

use crate::error::{RunError, RunResult};
use crate::geometry::{CellId, DetectorGeometry, DetectorLayout};
use crate::pipeline::types::{
    SimEvent, Step, StepPoint, StepStatus, TrackState, VolumeTouch, OPTICAL_PHOTON,
    PRIMARY_TRACK_ID,
};
use crate::units::{CM, ELECTRON_MASS, EV, GEV, MEV, MM, MUON_MASS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;
use std::ops::Range;
use std::sync::Arc;

/// Gun and tracer parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GunConfig {
    pub particle: String,
    pub energy: f64,
    pub start_z: f64,
    /// Start position is uniform in ±`start_half_xy` along x and y
    pub start_half_xy: f64,
    pub theta_sigma: f64,
    pub theta_max: f64,
    /// Mean ionisation loss per unit path
    pub dedx: f64,
    /// Scintillation photons per MeV deposited
    pub photons_per_mev: f64,
    /// Share of photons that reach the cell surface
    pub photon_escape_probability: f64,
    /// Chance of a knock-on electron per cell crossing
    pub delta_probability: f64,
}

impl Default for GunConfig {
    fn default() -> Self {
        Self {
            particle: "mu-".to_string(),
            energy: 4.0 * GEV,
            start_z: 50.0 * CM,
            start_half_xy: 7.5 * CM,
            theta_sigma: 0.1,
            theta_max: 0.5,
            dedx: 0.2 * MEV / MM,
            photons_per_mev: 2.0,
            photon_escape_probability: 0.8,
            delta_probability: 0.05,
        }
    }
}

impl GunConfig {
    /// Signed polar-angle spread around the downward axis, capped at `theta_max`.
    pub fn theta_distribution(&self) -> RunResult<Normal<f64>> {
        Normal::new(0.0, self.theta_sigma).map_err(|e| {
            RunError::Configuration(format!("theta_sigma {}: {}", self.theta_sigma, e))
        })
    }
}

pub struct MuonGun {
    geometry: Arc<DetectorGeometry>,
    config: GunConfig,
    theta: Normal<f64>,
    seed: u64,
    next_event: i32,
    end_event: i32,
}

impl MuonGun {
    /// Source for the event ids in `events`.
    pub fn new(
        geometry: Arc<DetectorGeometry>,
        config: GunConfig,
        seed: u64,
        events: Range<i32>,
    ) -> RunResult<Self> {
        let theta = config.theta_distribution()?;
        Ok(Self {
            geometry,
            config,
            theta,
            seed,
            next_event: events.start,
            end_event: events.end,
        })
    }

    /// Split `0..events` into `shards` contiguous blocks, one source each.
    pub fn sharded(
        geometry: Arc<DetectorGeometry>,
        config: &GunConfig,
        seed: u64,
        events: i32,
        shards: usize,
    ) -> RunResult<Vec<MuonGun>> {
        let shards = i32::try_from(shards.max(1))
            .map_err(|_| RunError::Configuration(format!("too many shards: {}", shards)))?;
        let events = i64::from(events.max(0));
        let per_shard = (events + i64::from(shards) - 1) / i64::from(shards);
        (0..i64::from(shards))
            .map(|k| {
                // Both bounds are clamped to `events`, which fits in i32
                let start = (k * per_shard).min(events) as i32;
                let end = ((k + 1) * per_shard).min(events) as i32;
                MuonGun::new(Arc::clone(&geometry), config.clone(), seed, start..end)
            })
            .collect()
    }

    pub fn remaining(&self) -> usize {
        (i64::from(self.end_event) - i64::from(self.next_event)).max(0) as usize
    }

    /// The event with id `event_id`. Deterministic for a given seed.
    pub fn generate(&self, event_id: i32) -> SimEvent {
        let mut rng = StdRng::seed_from_u64(
            self.seed ^ (event_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );

        let theta = self.polar_angle(&mut rng);
        let phi = rng.gen_range(0.0..2.0 * PI);
        let direction = [
            theta.sin() * phi.cos(),
            theta.sin() * phi.sin(),
            -theta.cos(),
        ];
        let start = [
            rng.gen_range(-self.config.start_half_xy..self.config.start_half_xy),
            rng.gen_range(-self.config.start_half_xy..self.config.start_half_xy),
            self.config.start_z,
        ];

        let mut tracer = Tracer {
            geometry: &self.geometry,
            config: &self.config,
            rng: &mut rng,
            primary: Vec::new(),
            secondaries: Vec::new(),
            next_track_id: PRIMARY_TRACK_ID + 1,
            kinetic_energy: self.config.energy,
        };
        tracer.trace_primary(start, direction);

        let mut steps = tracer.primary;
        steps.append(&mut tracer.secondaries);
        SimEvent { event_id, steps }
    }

    fn polar_angle(&self, rng: &mut StdRng) -> f64 {
        self.theta.sample(rng).min(self.config.theta_max)
    }
}

impl Iterator for MuonGun {
    type Item = SimEvent;

    fn next(&mut self) -> Option<SimEvent> {
        if self.next_event >= self.end_event {
            return None;
        }
        let event = self.generate(self.next_event);
        self.next_event += 1;
        Some(event)
    }
}

fn lerp(a: [f64; 3], b: [f64; 3], t: f64) -> [f64; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2) + (b[2] - a[2]).powi(2)).sqrt()
}

fn isotropic(rng: &mut StdRng) -> [f64; 3] {
    let cos_theta: f64 = rng.gen_range(-1.0..1.0);
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
    let phi = rng.gen_range(0.0..2.0 * PI);
    [sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta]
}

struct Tracer<'a> {
    geometry: &'a DetectorGeometry,
    config: &'a GunConfig,
    rng: &'a mut StdRng,
    primary: Vec<Step>,
    secondaries: Vec<Step>,
    next_track_id: i32,
    kinetic_energy: f64,
}

impl Tracer<'_> {
    fn world_touch(&self) -> Option<VolumeTouch> {
        Some(VolumeTouch {
            logical_volume: self.geometry.world_volume(),
            copy_number: 0,
        })
    }

    fn cell_touch(&self, cell: CellId) -> Option<VolumeTouch> {
        Some(VolumeTouch {
            logical_volume: self.geometry.cell_volume(),
            copy_number: cell.as_i32(),
        })
    }

    /// Straight line from `start` down to the bottom of the world.
    fn trace_primary(&mut self, start: [f64; 3], direction: [f64; 3]) {
        let half_thick = self.geometry.thickness() / 2.0;
        let bottom = -self.geometry.world_half_extent()[2];
        let at_z = |z: f64| {
            let t = (z - start[2]) / direction[2];
            [start[0] + direction[0] * t, start[1] + direction[1] * t, z]
        };

        let slabs: Vec<(f64, f64)> = self
            .geometry
            .planes()
            .iter()
            .map(|p| (p.z_center + half_thick, p.z_center - half_thick))
            .collect();

        let mut position = start;
        let mut pre_status = StepStatus::Undefined;
        let world = self.world_touch();
        for (top, base) in slabs {
            let entry = at_z(top);
            self.push_primary(position, entry, world, pre_status, 0.0);
            pre_status = StepStatus::GeomBoundary;
            self.cross_slab(entry, at_z(base));
            position = at_z(base);
        }
        self.push_primary(position, at_z(bottom), world, pre_status, 0.0);
        if let Some(last) = self.primary.last_mut() {
            last.post.volume = None;
        }
    }

    /// Split one plane crossing at the cell grid lines.
    fn cross_slab(&mut self, entry: [f64; 3], exit: [f64; 3]) {
        let plane_size = self.geometry.config().plane_size;
        let n = self.geometry.addressing().cells_per_side();
        let width = self.geometry.cell_width();

        let mut cuts = vec![0.0, 1.0];
        for axis in 0..2 {
            for k in 0..=n {
                let line = -plane_size / 2.0 + k as f64 * width;
                let (a, b) = (entry[axis] - line, exit[axis] - line);
                if a * b < 0.0 {
                    cuts.push(a / (a - b));
                }
            }
        }
        cuts.sort_by(|a, b| a.total_cmp(b));
        cuts.dedup_by(|a, b| (*a - *b).abs() < 1e-12);

        for window in cuts.windows(2) {
            let pre = lerp(entry, exit, window[0]);
            let post = lerp(entry, exit, window[1]);
            let middle = lerp(entry, exit, (window[0] + window[1]) / 2.0);

            match self.geometry.locate(middle) {
                Some(cell) => {
                    let length = distance(pre, post);
                    let edep = (self.config.dedx * length * self.rng.gen_range(0.7..1.5))
                        .min(self.kinetic_energy);
                    let touch = self.cell_touch(cell);
                    self.push_primary(pre, post, touch, StepStatus::GeomBoundary, edep);
                    self.emit_photons(cell, pre, post, edep);
                    if self.rng.gen_bool(self.config.delta_probability) {
                        let origin = lerp(pre, post, self.rng.gen());
                        self.emit_delta(cell, origin);
                    }
                }
                None => {
                    let touch = self.world_touch();
                    self.push_primary(pre, post, touch, StepStatus::GeomBoundary, 0.0);
                }
            }
        }
    }

    fn push_primary(
        &mut self,
        pre: [f64; 3],
        post: [f64; 3],
        volume: Option<VolumeTouch>,
        pre_status: StepStatus,
        edep: f64,
    ) {
        self.kinetic_energy -= edep;
        let mass = if self.config.particle.starts_with("mu") {
            MUON_MASS
        } else {
            0.0
        };
        self.primary.push(Step {
            pre: StepPoint {
                position: pre,
                volume,
                status: pre_status,
            },
            post: StepPoint {
                position: post,
                volume,
                status: StepStatus::GeomBoundary,
            },
            track: TrackState {
                track_id: PRIMARY_TRACK_ID,
                particle: self.config.particle.clone(),
                kinetic_energy: self.kinetic_energy,
                total_energy: self.kinetic_energy + mass,
            },
            energy_deposit: edep,
        });
    }

    fn take_track_id(&mut self) -> i32 {
        let id = self.next_track_id;
        self.next_track_id += 1;
        id
    }

    fn emit_photons(&mut self, cell: CellId, pre: [f64; 3], post: [f64; 3], edep: f64) {
        let Some(placement) = self.geometry.placement(cell).copied() else {
            return;
        };
        let half = [
            self.geometry.cell_width() / 2.0,
            self.geometry.cell_depth() / 2.0,
            self.geometry.thickness() / 2.0,
        ];
        let count = (edep * self.config.photons_per_mev).round() as usize;

        for _ in 0..count {
            let origin = lerp(pre, post, self.rng.gen());
            let direction = isotropic(self.rng);
            let energy = self.rng.gen_range(2.0..4.0) * EV;
            let escapes = self.rng.gen_bool(self.config.photon_escape_probability);

            let exit = box_exit(origin, direction, placement.center, half);
            let (end, status) = if escapes {
                (exit, StepStatus::GeomBoundary)
            } else {
                (lerp(origin, exit, self.rng.gen()), StepStatus::PostStepProcess)
            };

            let track_id = self.take_track_id();
            let touch = self.cell_touch(cell);
            self.secondaries.push(Step {
                pre: StepPoint {
                    position: origin,
                    volume: touch,
                    status: StepStatus::Undefined,
                },
                post: StepPoint {
                    position: end,
                    volume: touch,
                    status,
                },
                track: TrackState {
                    track_id,
                    particle: OPTICAL_PHOTON.to_string(),
                    kinetic_energy: energy,
                    total_energy: energy,
                },
                energy_deposit: 0.0,
            });
        }
    }

    /// A short-range electron absorbed where it is produced.
    fn emit_delta(&mut self, cell: CellId, origin: [f64; 3]) {
        let energy = self.rng.gen_range(0.1..1.0) * MEV;
        let direction = isotropic(self.rng);
        let range = self.rng.gen_range(0.1..1.0) * MM;
        let end = [
            origin[0] + direction[0] * range,
            origin[1] + direction[1] * range,
            origin[2] + direction[2] * range,
        ];

        let track_id = self.take_track_id();
        let touch = self.cell_touch(cell);
        self.secondaries.push(Step {
            pre: StepPoint {
                position: origin,
                volume: touch,
                status: StepStatus::Undefined,
            },
            post: StepPoint {
                position: end,
                volume: touch,
                status: StepStatus::PostStepProcess,
            },
            track: TrackState {
                track_id,
                particle: "e-".to_string(),
                kinetic_energy: 0.0,
                total_energy: ELECTRON_MASS,
            },
            energy_deposit: energy,
        });
    }
}

/// Point where a ray from inside an axis-aligned box leaves it.
fn box_exit(origin: [f64; 3], direction: [f64; 3], center: [f64; 3], half: [f64; 3]) -> [f64; 3] {
    let mut t_exit = f64::INFINITY;
    for axis in 0..3 {
        if direction[axis].abs() < 1e-12 {
            continue;
        }
        let face = if direction[axis] > 0.0 {
            center[axis] + half[axis]
        } else {
            center[axis] - half[axis]
        };
        let t = (face - origin[axis]) / direction[axis];
        if t >= 0.0 && t < t_exit {
            t_exit = t;
        }
    }
    if !t_exit.is_finite() {
        return origin;
    }
    [
        origin[0] + direction[0] * t_exit,
        origin[1] + direction[1] * t_exit,
        origin[2] + direction[2] * t_exit,
    ]
}

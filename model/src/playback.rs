use anyhow::Result;
use geojson::{Feature, FeatureCollection, GeoJson};
use geom::{Angle, Duration, GPSBounds, Pt2D, Speed, Time};

use crate::route::{PathMetrics, Route};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Running,
    Paused,
    Completed,
}

/// One evaluation of the playback at a particular clock reading.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pos: Pt2D,
    pub heading: Angle,
    /// The constant traversal speed while running, zero otherwise
    pub speed: Speed,
    /// Whole percent, 0-100. Never decreases during a single run.
    pub progress_percent: usize,
    pub state: PlaybackState,
}

/// Replays a route at constant speed over wall-clock time. The caller owns the frame loop and
/// feeds in timestamps; there are no timers or threads here, so a tick is a deterministic
/// function of the state and the clock reading. Once a tick reports anything other than
/// `Running`, the caller should stop scheduling frames -- further ticks are frozen no-ops.
///
/// One instance animates one route. For several devices at once, make several instances.
pub struct Playback {
    route: Option<(Route, PathMetrics)>,
    duration: Duration,
    state: PlaybackState,
    // Clock anchor of the current running span, captured on the first tick after play()
    started_at: Option<Time>,
    // The most recent clock reading, for freezing elapsed time on pause()
    last_tick: Option<Time>,
    // Run time accumulated across earlier pause/resume cycles
    elapsed_before_pause: Duration,
    current: Option<Frame>,
}

impl Playback {
    pub fn new(duration: Duration) -> Result<Self> {
        if duration <= Duration::ZERO {
            bail!("Playback duration must be positive, not {duration}");
        }
        Ok(Self {
            route: None,
            duration,
            state: PlaybackState::Idle,
            started_at: None,
            last_tick: None,
            elapsed_before_pause: Duration::ZERO,
            current: None,
        })
    }

    /// Replaces the route being animated, rebuilding the arc-length table and rewinding to the
    /// start. If the points don't form a route, the previous route and all progress survive
    /// untouched.
    pub fn set_route(&mut self, points: Vec<Pt2D>) -> Result<()> {
        let route = Route::new(points)?;
        let metrics = PathMetrics::new(&route);
        self.current = Some(Self::rest_frame(&route));
        self.route = Some((route, metrics));
        self.state = PlaybackState::Idle;
        self.started_at = None;
        self.last_tick = None;
        self.elapsed_before_pause = Duration::ZERO;
        Ok(())
    }

    /// Allowed in any state and never rewinds; mid-run, the elapsed time just covers a different
    /// share of the route from now on.
    pub fn set_duration(&mut self, duration: Duration) -> Result<()> {
        if duration <= Duration::ZERO {
            bail!("Playback duration must be positive, not {duration}");
        }
        self.duration = duration;
        Ok(())
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// No-op while already running. From `Completed`, rewinds and starts over.
    pub fn play(&mut self) {
        match self.state {
            PlaybackState::Running => {}
            PlaybackState::Completed => {
                self.elapsed_before_pause = Duration::ZERO;
                self.started_at = None;
                self.last_tick = None;
                self.state = PlaybackState::Running;
            }
            PlaybackState::Idle | PlaybackState::Paused => {
                self.started_at = None;
                self.last_tick = None;
                self.state = PlaybackState::Running;
            }
        }
    }

    /// Freezes elapsed time as of the last tick. No-op unless running.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Running {
            return;
        }
        if let (Some(started), Some(last)) = (self.started_at, self.last_tick) {
            if last > started {
                self.elapsed_before_pause += last - started;
            }
        }
        self.started_at = None;
        self.last_tick = None;
        self.state = PlaybackState::Paused;
        if let Some(frame) = &mut self.current {
            frame.state = PlaybackState::Paused;
            frame.speed = Speed::ZERO;
        }
    }

    /// Rewinds to the start of the route from any state. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.state = PlaybackState::Idle;
        self.started_at = None;
        self.last_tick = None;
        self.elapsed_before_pause = Duration::ZERO;
        if let Some((route, _)) = &self.route {
            self.current = Some(Self::rest_frame(route));
        }
    }

    /// Advances to the given clock reading; call once per frame. In any state but `Running` the
    /// frame is frozen and the clock reading is ignored. Returns `None` until a route is set.
    pub fn tick(&mut self, now: Time) -> Option<Frame> {
        let (route, metrics) = self.route.as_ref()?;
        if self.state != PlaybackState::Running {
            return self.current.clone();
        }

        let started = *self.started_at.get_or_insert(now);
        self.last_tick = Some(now);
        // Tolerate a clock reading from before the anchor instead of rewinding
        let run_span = if now > started {
            now - started
        } else {
            Duration::ZERO
        };
        let elapsed = self.elapsed_before_pause + run_span;
        let fraction = (elapsed / self.duration).clamp(0.0, 1.0);

        let (pos, heading) = metrics.interpolate(route, fraction);
        let mut frame = Frame {
            pos,
            heading,
            speed: Speed::from_dist_time(metrics.total_length(), self.duration),
            progress_percent: (fraction * 100.0).floor() as usize,
            state: PlaybackState::Running,
        };
        if fraction >= 1.0 {
            frame.pos = route.last_pt();
            frame.speed = Speed::ZERO;
            frame.state = PlaybackState::Completed;
            self.state = PlaybackState::Completed;
        }
        self.current = Some(frame.clone());
        Some(frame)
    }

    fn rest_frame(route: &Route) -> Frame {
        Frame {
            pos: route.first_pt(),
            heading: Angle::ZERO,
            speed: Speed::ZERO,
            progress_percent: 0,
            state: PlaybackState::Idle,
        }
    }
}

/// Renders a replayed run as GeoJSON: the route itself, then one point per sampled frame.
pub fn trace_to_geojson(
    route: &Route,
    samples: &[(Duration, Frame)],
    gps_bounds: &GPSBounds,
) -> GeoJson {
    let mut features = Vec::new();

    if let Ok(pl) = route.as_polyline() {
        let mut feature = Feature {
            bbox: None,
            geometry: Some(pl.to_geojson(Some(gps_bounds))),
            id: None,
            properties: None,
            foreign_members: None,
        };
        feature.set_property("type", "route");
        features.push(feature);
    }

    for (elapsed, frame) in samples {
        let pos = frame.pos.to_gps(gps_bounds);
        let mut feature = Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                pos.x(),
                pos.y(),
            ]))),
            id: None,
            properties: None,
            foreign_members: None,
        };
        feature.set_property("type", "sample");
        feature.set_property("elapsed_seconds", elapsed.inner_seconds());
        feature.set_property("progress_percent", frame.progress_percent);
        feature.set_property("heading_degrees", frame.heading.normalized_degrees());
        features.push(feature);
    }

    GeoJson::FeatureCollection(FeatureCollection {
        features,
        bbox: None,
        foreign_members: None,
    })
}

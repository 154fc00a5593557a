//! A scripted, in-memory stand-in for the motion simulator, plus the
//! fixtures the integration tests share.
#![allow(dead_code)]

use platoon_sim::{
    ClassInfo, ClassModes, Error, Interval, LeaderInfo, Platoon, PlatoonConfig, PlatoonManager,
    Simulator, SpawnRequest, Telemetry, TelemetryField, VehicleId,
};
use std::collections::{HashMap, HashSet};

/// Every exchange is scripted by the test: telemetry and leader reports are
/// placed into maps, arrivals into a queue, and every command the engine
/// issues is logged for inspection.
pub struct MockSim {
    pub dt: f64,
    pub time: f64,
    pub classes: HashMap<String, ClassInfo>,
    pub routes: HashMap<(String, String), Vec<String>>,
    pub vehicles: HashMap<String, SpawnRequest>,
    pub telemetry: HashMap<String, Telemetry>,
    pub leaders: HashMap<String, LeaderInfo>,
    pub arrivals: Vec<String>,
    pub invalid_routes: HashSet<String>,
    /// When set, every control switch is reported unsafe.
    pub unsafe_switches: bool,
    pub subscribed: HashSet<String>,
    pub lane_requests: Vec<(String, u32, f64)>,
    pub control_log: Vec<(String, String)>,
    pub spawn_log: Vec<String>,
}

impl MockSim {
    pub fn new() -> Self {
        let truck = ClassInfo {
            length: 8.0,
            emergency_decel: 7.0,
            max_speed: 25.0,
        };
        let mut classes = HashMap::new();
        classes.insert(
            "normal-car".to_owned(),
            ClassInfo {
                length: 4.5,
                emergency_decel: 9.0,
                max_speed: 50.0,
            },
        );
        classes.insert(
            "sedan".to_owned(),
            ClassInfo {
                length: 4.2,
                emergency_decel: 9.0,
                max_speed: 40.0,
            },
        );
        for class in [
            "truck-connected",
            "truck-leader",
            "truck-follower",
            "truck-catchup",
            "truck-catchup-follower",
        ] {
            classes.insert(class.to_owned(), truck);
        }

        let mut routes = HashMap::new();
        routes.insert(
            ("edge-a".to_owned(), "edge-d".to_owned()),
            vec![
                "edge-a".to_owned(),
                "edge-b".to_owned(),
                "edge-c".to_owned(),
                "edge-d".to_owned(),
            ],
        );

        Self {
            dt: 1.0,
            time: 0.0,
            classes,
            routes,
            vehicles: HashMap::new(),
            telemetry: HashMap::new(),
            leaders: HashMap::new(),
            arrivals: Vec::new(),
            invalid_routes: HashSet::new(),
            unsafe_switches: false,
            subscribed: HashSet::new(),
            lane_requests: Vec::new(),
            control_log: Vec::new(),
            spawn_log: Vec::new(),
        }
    }

    /// Scripts a vehicle's position for the next telemetry poll.
    pub fn place(&mut self, id: &str, edge: &str, lane_index: u32, pos: f64, speed: f64) {
        self.telemetry.insert(
            id.to_owned(),
            Telemetry {
                speed,
                edge: edge.to_owned(),
                lane: format!("{}_{}", edge, lane_index),
                lane_index,
                lane_pos: pos,
                fuel: 1.5,
                distance: pos,
            },
        );
    }

    /// Scripts the leader report for a vehicle.
    pub fn lead(&mut self, follower: &str, leader: &str, gap: f64) {
        self.leaders.insert(
            follower.to_owned(),
            LeaderInfo {
                id: leader.to_owned(),
                gap,
            },
        );
    }

    /// Clears the leader report for a vehicle.
    pub fn clear_lead(&mut self, follower: &str) {
        self.leaders.remove(follower);
    }

    /// Scripts a vehicle completing its route on the next tick.
    pub fn arrive(&mut self, id: &str) {
        self.arrivals.push(id.to_owned());
        self.vehicles.remove(id);
        self.telemetry.remove(id);
        self.leaders.remove(id);
    }
}

impl Simulator for MockSim {
    fn delta_t(&self) -> f64 {
        self.dt
    }

    fn now(&self) -> f64 {
        self.time
    }

    fn find_route(&mut self, from: &str, to: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .routes
            .get(&(from.to_owned(), to.to_owned()))
            .cloned()
            .unwrap_or_default())
    }

    fn add_vehicle(&mut self, request: &SpawnRequest) -> Result<(), Error> {
        self.spawn_log.push(request.id.clone());
        let edge = request.route.first().cloned().unwrap_or_default();
        self.telemetry.insert(
            request.id.clone(),
            Telemetry {
                speed: 0.0,
                lane: format!("{}_0", edge),
                edge,
                lane_index: 0,
                lane_pos: 0.0,
                fuel: 1.0,
                distance: 0.0,
            },
        );
        self.vehicles.insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn remove_vehicle(&mut self, id: &str) -> Result<(), Error> {
        self.vehicles.remove(id);
        self.telemetry.remove(id);
        Ok(())
    }

    fn route_valid(&mut self, id: &str) -> Result<bool, Error> {
        Ok(!self.invalid_routes.contains(id))
    }

    fn subscribe(&mut self, id: &str, _fields: &[TelemetryField]) -> Result<(), Error> {
        self.subscribed.insert(id.to_owned());
        Ok(())
    }

    fn unsubscribe(&mut self, id: &str) -> Result<(), Error> {
        self.subscribed.remove(id);
        Ok(())
    }

    fn poll_telemetry(&mut self) -> Result<HashMap<String, Telemetry>, Error> {
        Ok(self.telemetry.clone())
    }

    fn leader_ahead(&mut self, id: &str, max_dist: f64) -> Result<Option<LeaderInfo>, Error> {
        Ok(self
            .leaders
            .get(id)
            .filter(|info| info.gap <= max_dist)
            .cloned())
    }

    fn vehicle_length(&mut self, id: &str) -> Result<f64, Error> {
        let length = self
            .vehicles
            .get(id)
            .and_then(|request| self.classes.get(&request.class))
            .map(|info| info.length);
        Ok(length.unwrap_or(5.0))
    }

    fn arrived(&mut self) -> Result<Vec<String>, Error> {
        Ok(std::mem::take(&mut self.arrivals))
    }

    fn advance(&mut self) -> Result<(), Error> {
        self.time += self.dt;
        Ok(())
    }

    fn change_lane(&mut self, id: &str, lane: u32, duration: f64) -> Result<bool, Error> {
        self.lane_requests.push((id.to_owned(), lane, duration));
        Ok(true)
    }

    fn control_switch_safe(&mut self, _id: &str, _class: &str) -> Result<bool, Error> {
        Ok(!self.unsafe_switches)
    }

    fn change_control(&mut self, id: &str, class: &str) -> Result<(), Error> {
        self.control_log.push((id.to_owned(), class.to_owned()));
        if let Some(request) = self.vehicles.get_mut(id) {
            request.class = class.to_owned();
        }
        Ok(())
    }

    fn vehicle_classes(&mut self) -> Result<Vec<String>, Error> {
        let mut classes: Vec<String> = self.classes.keys().cloned().collect();
        classes.sort();
        Ok(classes)
    }

    fn class_info(&mut self, class: &str) -> Result<Option<ClassInfo>, Error> {
        Ok(self.classes.get(class).copied())
    }
}

/// The parameter set the integration tests run with.
pub fn test_config() -> PlatoonConfig {
    let mut config = PlatoonConfig::default();
    config.start_edge = "edge-a".to_owned();
    config.end_edge = "edge-d".to_owned();
    config.normal_class = "normal-car".to_owned();
    config.platoon_selectors = vec!["connected".to_owned()];
    config.classes.insert(
        "truck-connected".to_owned(),
        ClassModes {
            leader: "truck-leader".to_owned(),
            follower: Some("truck-follower".to_owned()),
            catchup: Some("truck-catchup".to_owned()),
            catchup_follower: Some("truck-catchup-follower".to_owned()),
        },
    );
    config.max_platoon_gap = 100.0;
    config.catchup_distance = 200.0;
    config.platoon_split_time = 3.0;
    config.switch_impatience = 10.0;
    config.join_tolerance = 100.0;
    config.arrival_lanes = vec![0, 1];
    config.arrival_range = Interval::new(400.0, 450.0);
    config.rng_seed = Some(7);
    config
}

/// Builds an engine with `platoon_cars` candidates and no normal vehicles.
pub fn engine(platoon_cars: usize) -> PlatoonManager<MockSim> {
    engine_with(platoon_cars, platoon_cars, MockSim::new())
}

/// Builds an engine with explicit population targets and seeds the road.
pub fn engine_with(
    platoon_cars: usize,
    total_cars: usize,
    sim: MockSim,
) -> PlatoonManager<MockSim> {
    let mut config = test_config();
    config.platoon_car_target = platoon_cars;
    config.total_car_target = total_cars;
    let mut manager = PlatoonManager::new(sim, config).expect("engine should start");
    manager.ensure_population().expect("population should seed");
    manager
}

/// The member names of a platoon, front to back.
pub fn member_names(manager: &PlatoonManager<MockSim>, platoon: &Platoon) -> Vec<String> {
    platoon
        .members()
        .iter()
        .map(|id| manager.vehicle(*id).unwrap().name().to_owned())
        .collect()
}

/// All platoon rosters, in registration order.
pub fn rosters(manager: &PlatoonManager<MockSim>) -> Vec<Vec<String>> {
    manager
        .platoons()
        .map(|platoon| member_names(manager, platoon))
        .collect()
}

/// Asserts that every vehicle is in exactly one platoon and no platoon
/// holds a duplicate or is empty.
pub fn assert_membership_invariant(manager: &PlatoonManager<MockSim>) {
    let mut seen: HashSet<VehicleId> = HashSet::new();
    let mut total = 0;
    for platoon in manager.platoons() {
        assert!(platoon.size() > 0, "an empty platoon is registered");
        for id in platoon.members() {
            assert!(seen.insert(*id), "a vehicle appears in two platoons");
            assert_eq!(
                manager.vehicle(*id).expect("member must exist").platoon(),
                platoon.id(),
                "member's back-reference disagrees with the platoon",
            );
            total += 1;
        }
    }
    assert_eq!(total, manager.vehicle_count());
}

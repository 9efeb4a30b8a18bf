mod config;
mod pawn;
mod prop;

use glam::Vec2;

pub use config::PawnConfig;
pub use pawn::{
    Pawn, DASH_ACTION, HEAL_ACTION, PAWN_COLOR, PAWN_DESIRED_DIRECTION, PAWN_GROUNDED,
    PAWN_HEALTH, PAWN_HEIGHT, PAWN_NAME, PAWN_POSITION, PAWN_VELOCITY,
};
pub use prop::{Prop, PROP_ACTIVE, PROP_LABEL, PROP_POSITION};

use crate::net::RegistryError;
use crate::replication::{NetObject, ObjectRegistry, Replicate, Scene};

pub const PAWN_TYPE_ID: u32 = 1;
pub const PROP_TYPE_ID: u32 = 2;

/// Registry of every replicable type in the game.
pub fn object_registry() -> Result<ObjectRegistry, RegistryError> {
    ObjectRegistry::from_table([
        (PAWN_TYPE_ID, new_pawn as fn() -> Box<dyn Replicate>),
        (PROP_TYPE_ID, new_prop),
    ])
}

fn new_pawn() -> Box<dyn Replicate> {
    Box::new(Pawn::default())
}

fn new_prop() -> Box<dyn Replicate> {
    Box::new(Prop::default())
}

/// Lays out the static part of a freshly loaded scene.
pub fn populate_scene(scene: &mut Scene) {
    let mut root = NetObject::local(Prop::new(scene.name().to_string(), Vec2::ZERO));
    for (index, x) in [-6.0, 0.0, 6.0].into_iter().enumerate() {
        root = root.with_child(NetObject::new(Prop::new(
            format!("lily_pad_{}", index),
            Vec2::new(x, 4.0),
        )));
    }
    scene.add(root);
}

/// Spawns the pawn `client_id` will control and returns its network id.
pub fn spawn_pawn(scene: &mut Scene, client_id: i32) -> i32 {
    let mut pawn = Pawn::named(format!("frog_{}", client_id));
    pawn.color = client_id.rem_euclid(8) as u8;
    pawn.position = Vec2::new(client_id as f32 * 1.5, 0.0);
    scene.add(NetObject::new(pawn).with_owner(client_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populated_scene_replicates_only_lily_pads() {
        let mut scene = Scene::new("pond", true);
        populate_scene(&mut scene);
        let snapshot = scene.build_snapshot(0, Vec::new(), crate::replication::SyncMode::Full);
        assert_eq!(snapshot.objects.len(), 3);
        assert!(snapshot.objects.iter().all(|tree| tree.type_id == PROP_TYPE_ID));
    }

    #[test]
    fn spawned_pawn_is_found_by_owner() {
        let mut scene = Scene::new("pond", true);
        let id = spawn_pawn(&mut scene, 3);
        let pawn = scene.find_pawn(3).unwrap();
        assert_eq!(pawn.network_id(), id);
        assert_eq!(
            pawn.get(PAWN_NAME),
            Some(crate::replication::PropertyValue::Text("frog_3".to_string()))
        );
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PawnConfig {
    pub move_speed_ground: f32,
    pub move_speed_air: f32,

    pub accelerate_ground: f32,
    pub accelerate_air: f32,
    pub decelerate_ground: f32,

    pub gravity: f32,
    pub gravity_fall: f32,
    pub max_fall_speed: f32,

    pub leap_power: f32,
    pub leap_speed: f32,

    pub dash_speed: f32,
    pub heal_amount: i32,
    pub max_health: i32,
}

impl Default for PawnConfig {
    fn default() -> Self {
        Self {
            move_speed_ground: 6.0,
            move_speed_air: 4.5,

            accelerate_ground: 7.0,
            accelerate_air: 2.0,
            decelerate_ground: 25.0,

            gravity: 9.8,
            gravity_fall: 16.0,
            max_fall_speed: 40.0,

            leap_power: 5.0,
            leap_speed: 8.0,

            dash_speed: 12.0,
            heal_amount: 25,
            max_health: 100,
        }
    }
}

/// Simulation timing constants
pub mod sim {
    /// Server tick rate in Hz
    pub const TICK_RATE: u32 = 30;
    /// Delta time per tick in seconds
    pub const TICK_TIMESTEP_S: f32 = 1.0 / 30.0;
}

/// Interest management constants
pub mod aoi {
    /// Awareness radius of client-controlled entities (world units)
    ///
    /// An entity is in range when the planar distance between bounding-box
    /// centers is strictly less than this value. Exactly on the radius is out.
    pub const AOI_RADIUS: f32 = 400.0;
    /// Default spatial locator cell size (world units)
    ///
    /// Smaller than the AOI radius so a radius query touches a handful of cells.
    pub const LOCATOR_CELL_SIZE: f32 = 128.0;
    /// Upper bound on `radius / cell_size`; a radius query scans the square of this many cells
    pub const MAX_RADIUS_CELLS: f32 = 64.0;
}

/// Movement integration constants
pub mod movement {
    /// Top ground speed (units/second)
    pub const RUN_SPEED: f32 = 250.0;
    /// Vertical speed for in/out of plane movement (units/second)
    pub const CLIMB_SPEED: f32 = 120.0;
    /// Acceleration towards the input-selected velocity (units/second²)
    pub const ACCELERATION: f32 = 2000.0;
}

/// Default model-space bounds for spawned entities
pub mod bounds {
    /// Half-width of a client entity's collision box
    pub const CLIENT_HALF_EXTENT: f32 = 8.0;
    /// Height of a client entity's collision box
    pub const CLIENT_HEIGHT: f32 = 32.0;
    /// Half-width of a dynamic object's collision box
    pub const OBJECT_HALF_EXTENT: f32 = 16.0;
    /// Height of a dynamic object's collision box
    pub const OBJECT_HEIGHT: f32 = 16.0;
}

/// Networking constants
pub mod net {
    /// Bounded capacity for every inbound/outbound message queue
    pub const QUEUE_CAPACITY: usize = 1024;
    /// Ticks of input kept on the client for replay
    pub const INPUT_HISTORY_LENGTH: usize = 20;
    /// How far ahead of the server's tick a new client starts
    pub const INITIAL_TICK_OFFSET: u32 = 5;
    /// Smallest acceptable client lead over the server (ticks)
    pub const TICK_LEAD_MIN: i64 = 1;
    /// Largest acceptable client lead over the server (ticks)
    pub const TICK_LEAD_MAX: i64 = 5;
    /// Lead the server steers a client towards when it adjusts it
    pub const TICK_LEAD_TARGET: i64 = 2;
    /// Ticks to wait after sending an adjustment before sending another
    pub const TICK_ADJUSTMENT_COOLDOWN: u32 = 30;
    /// Furthest ahead an input request may be held for (ticks)
    pub const MAX_HELD_INPUT_LEAD: u32 = 60;
    /// Seconds the client waits for a ConnectionResponse
    pub const CONNECTION_RESPONSE_WAIT_S: f32 = 5.0;
    /// Initial offset from the client's tick to the tick it renders
    /// remote entities at; negative, so remote state is shown slightly late
    pub const INITIAL_REPLICATION_OFFSET: i32 = -10;
}

//! SQL statements for the registry store (SQLite dialect).

pub const SERVER_COLUMNS: &str = "id, name, ip_address, ssh_username, ssh_password, ssh_port, \
     connection_status, created_at, updated_at";

pub const TRANSIT_COLUMNS: &str = "id, name, server_a_id, server_a_listen_port, server_b_id, \
     server_b_connect_port, encryption_protocol, destination_ip, destination_port, status, \
     latency_ms, created_at, updated_at";

pub const INSERT_SERVER: &str = r"
    INSERT INTO servers
        (name, ip_address, ssh_username, ssh_password, ssh_port, connection_status, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
";

pub const UPDATE_SERVER_STATUS: &str =
    "UPDATE servers SET connection_status = ?, updated_at = ? WHERE id = ?";

pub const DELETE_SERVER: &str = "DELETE FROM servers WHERE id = ?";

pub const COUNT_TRANSITS_FOR_SERVER: &str =
    "SELECT COUNT(*) FROM transits WHERE server_a_id = ? OR server_b_id = ?";

pub const INSERT_TRANSIT: &str = r"
    INSERT INTO transits
        (name, server_a_id, server_a_listen_port, server_b_id, server_b_connect_port,
         encryption_protocol, destination_ip, destination_port, status, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

pub const UPDATE_TRANSIT_STATUS: &str =
    "UPDATE transits SET status = ?, updated_at = ? WHERE id = ?";

pub const UPDATE_TRANSIT_STATUS_IF: &str =
    "UPDATE transits SET status = ?, updated_at = ? WHERE id = ? AND status = ?";

pub const DELETE_TRANSIT: &str = "DELETE FROM transits WHERE id = ?";

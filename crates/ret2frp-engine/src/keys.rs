//! KV key layout for the traffic index tables

use ret2frp_cache::Key;

/// `traffic:{traffic_id}:conf` — proxy configuration, expires at the deadline
pub(crate) fn conf(traffic_id: &str) -> Key {
    Key::root("traffic").at(traffic_id).at("conf")
}

/// `traffic:{traffic_id}:addr` — public address map, expires at the deadline
pub(crate) fn addr(traffic_id: &str) -> Key {
    Key::root("traffic").at(traffic_id).at("addr")
}

/// `working:{traffic_id}` — deprovisioning ledger, removed by the reaper
pub(crate) fn working(traffic_id: &str) -> Key {
    Key::root("working").at(traffic_id)
}

/// `port:{server_id}:{port}` — remote port reservation, removed by the reaper
pub(crate) fn port(server_id: &str, port: u16) -> Key {
    Key::root("port").at(server_id).at(port.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(conf("T1").as_str(), "traffic:T1:conf");
        assert_eq!(addr("T1").as_str(), "traffic:T1:addr");
        assert_eq!(working("T1").as_str(), "working:T1");
        assert_eq!(port("admin.s.node1", 10042).as_str(), "port:admin.s.node1:10042");
    }
}

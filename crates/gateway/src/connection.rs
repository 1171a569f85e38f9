use std::fmt;

use feedline_errors::{FeedError, FeedResult};

/// 单个长连接的生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Active,
    Idle,
    /// 终态
    Unregistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// 注册表已接受该连接
    Registered,
    /// 收到客户端帧
    Activity,
    /// 一段时间内没有客户端帧
    IdleTimeout,
    /// 读循环检测到连接关闭
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Registered => "registered",
            ConnectionState::Active => "active",
            ConnectionState::Idle => "idle",
            ConnectionState::Unregistered => "unregistered",
        };
        f.write_str(name)
    }
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Unregistered)
    }

    /// 已注册且未关闭，可以接收投递
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Registered | ConnectionState::Active | ConnectionState::Idle
        )
    }

    pub fn next(self, event: ConnectionEvent) -> FeedResult<ConnectionState> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let next = match (self, event) {
            (S::Unregistered, _) => None,
            (_, E::Closed) => Some(S::Unregistered),
            (S::Connecting, E::Registered) => Some(S::Registered),
            (S::Registered | S::Active | S::Idle, E::Activity) => Some(S::Active),
            (S::Registered | S::Active | S::Idle, E::IdleTimeout) => Some(S::Idle),
            _ => None,
        };

        next.ok_or_else(|| FeedError::Internal(format!("连接状态 {self} 不接受事件 {event:?}")))
    }
}

/// 持有当前状态并校验每次转换
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn apply(&mut self, event: ConnectionEvent) -> FeedResult<ConnectionState> {
        self.state = self.state.next(event)?;
        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let mut machine = ConnectionStateMachine::new();
        assert_eq!(machine.apply(ConnectionEvent::Registered).unwrap(), ConnectionState::Registered);
        assert_eq!(machine.apply(ConnectionEvent::Activity).unwrap(), ConnectionState::Active);
        assert_eq!(machine.apply(ConnectionEvent::IdleTimeout).unwrap(), ConnectionState::Idle);
        assert_eq!(machine.apply(ConnectionEvent::Activity).unwrap(), ConnectionState::Active);
        assert!(machine.state().is_live());
        assert_eq!(machine.apply(ConnectionEvent::Closed).unwrap(), ConnectionState::Unregistered);
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn test_unregistered_is_terminal() {
        let mut machine = ConnectionStateMachine::new();
        machine.apply(ConnectionEvent::Closed).unwrap();
        for event in [
            ConnectionEvent::Registered,
            ConnectionEvent::Activity,
            ConnectionEvent::IdleTimeout,
            ConnectionEvent::Closed,
        ] {
            assert!(machine.apply(event).is_err());
        }
        assert_eq!(machine.state(), ConnectionState::Unregistered);
    }

    #[test]
    fn test_activity_requires_registration() {
        assert!(ConnectionState::Connecting.next(ConnectionEvent::Activity).is_err());
        assert!(ConnectionState::Active.next(ConnectionEvent::Registered).is_err());
        assert!(!ConnectionState::Connecting.is_live());
    }
}

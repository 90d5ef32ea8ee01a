//! Print wire samples for browser client interop testing.
//!
//! Run with: cargo run --package termbridge-protocol --example test_vectors

use protocol::messages::*;

fn main() {
    print_client("start", &ClientEvent::TerminalStart(TerminalStart::new("t1", "/project")));
    print_client(
        "start_sized",
        &ClientEvent::TerminalStart(TerminalStart {
            terminal_id: "t2".to_string(),
            cwd: "src".to_string(),
            cols: Some(120),
            rows: Some(40),
        }),
    );
    print_client(
        "input",
        &ClientEvent::TerminalInput(TerminalInput {
            terminal_id: "t1".to_string(),
            data: "echo hi\n".to_string(),
        }),
    );
    print_client(
        "resize",
        &ClientEvent::TerminalResize(TerminalResize {
            terminal_id: "t1".to_string(),
            cols: 100,
            rows: 30,
        }),
    );
    print_client(
        "kill",
        &ClientEvent::TerminalKill(TerminalKill {
            terminal_id: "t1".to_string(),
        }),
    );

    print_server("output", &ServerEvent::output("t1", "hi\r\n"));
    print_server("close", &ServerEvent::close("t1"));
    print_server(
        "error",
        &ServerEvent::error(
            "t3",
            ErrorCode::InvalidWorkingDirectory,
            "Invalid working directory.",
        ),
    );
}

fn print_client(name: &str, event: &ClientEvent) {
    match event.to_json() {
        Ok(json) => println!("client/{}: {}", name, json),
        Err(e) => eprintln!("client/{}: {}", name, e),
    }
}

fn print_server(name: &str, event: &ServerEvent) {
    match event.to_json() {
        Ok(json) => println!("server/{}: {}", name, json),
        Err(e) => eprintln!("server/{}: {}", name, e),
    }
}

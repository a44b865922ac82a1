//! Command line client for poking a running server.
//!
//! Each subcommand sends one scenario of records and prints whatever comes
//! back until the server goes quiet.

use clap::{Parser, Subcommand};
use rand::Rng;
use shared::*;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Dedicated server address
    #[clap(short, long, default_value = "127.0.0.1:1337")]
    server: SocketAddr,
    /// Session id to present (random if omitted)
    #[clap(long)]
    session: Option<SessionId>,
    /// How long to wait for replies, in milliseconds
    #[clap(long, default_value = "500")]
    wait_ms: u64,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flood the server with GENERIC packets
    Spam {
        #[clap(default_value = "100000")]
        count: u32,
    },
    /// Create a character on an account
    Create {
        account: String,
        name: String,
        #[clap(long, default_value = "Human")]
        race: String,
        #[clap(long, default_value = "Warrior")]
        profession: String,
    },
    /// List the characters on an account
    Clist { account: String },
    /// Connect a character, then disconnect
    Connect { name: String },
    /// Connect a character and move it to random positions
    Move {
        name: String,
        #[clap(default_value = "5")]
        steps: u32,
    },
    /// Connect a character and say something in its zone
    Say { name: String, message: String },
    /// Connect a character and whisper to another one
    Whisper {
        name: String,
        target: String,
        message: String,
    },
}

struct Client {
    socket: UdpSocket,
    server: SocketAddr,
    session: SessionId,
    wait: Duration,
}

impl Client {
    async fn send<R: Record + std::fmt::Debug>(&self, record: &R) -> Result<(), Box<dyn std::error::Error>> {
        let data = encode(record)?;
        println!("-> {:?}", record);
        self.socket.send_to(&data, self.server).await?;
        Ok(())
    }

    /// Prints every reply until nothing arrives for the wait period.
    async fn print_replies(&self) {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let received = tokio::time::timeout(self.wait, self.socket.recv_from(&mut buf)).await;
            let len = match received {
                Ok(Ok((len, _))) => len,
                Ok(Err(e)) => {
                    println!("Receive error: {}", e);
                    return;
                }
                Err(_) => return,
            };
            print_record(&buf[..len]);
        }
    }

    async fn connect(&self, name: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.send(&ConnectPacket::new(self.session, name)).await?;
        self.print_replies().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.send(&DisconnectPacket::new(self.session)).await
    }
}

fn print_record(bytes: &[u8]) {
    let opcode = match peek_known_opcode(bytes) {
        Ok(opcode) => opcode,
        Err(e) => {
            println!("<- undecodable reply: {}", e);
            return;
        }
    };

    let printed = match opcode {
        Opcode::Ack => decode::<AckPacket>(bytes).map(|p| format!("{:?}", p)),
        Opcode::Error => decode::<ErrorPacket>(bytes).map(|p| format!("ERROR: {}", p.message)),
        Opcode::SendClist => decode::<SendClistPacket>(bytes).map(|p| format!("Characters: {:?}", p.characters)),
        Opcode::SendPlayer => decode::<SendPlayerPacket>(bytes).map(|p| {
            format!(
                "Playing {} ({} {}) in {} at ({}, {}, {})",
                p.pc.firstname,
                p.pc.race,
                p.pc.profession,
                p.pc.zone(),
                p.pc.position.x,
                p.pc.position.y,
                p.pc.position.z
            )
        }),
        Opcode::Disconnect => decode::<DisconnectPacket>(bytes).map(|_| "Disconnected by server".to_string()),
        Opcode::RelaySay => decode::<RelaySayPacket>(bytes).map(|p| format!("{} says: {}", p.sender, p.message)),
        Opcode::RelayWhisper => {
            decode::<RelayWhisperPacket>(bytes).map(|p| format!("{} whispers: {}", p.sender, p.message))
        }
        other => Ok(format!("{:?} ({} bytes)", other, bytes.len())),
    };

    match printed {
        Ok(line) => println!("<- {}", line),
        Err(e) => println!("<- malformed {:?}: {}", opcode, e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let session = args.session.unwrap_or_else(|| rand::thread_rng().gen());
    println!("Client socket bound to {}", socket.local_addr()?);
    println!("Using session {} against {}", session, args.server);

    let client = Client {
        socket,
        server: args.server,
        session,
        wait: Duration::from_millis(args.wait_ms),
    };

    match args.command {
        Command::Spam { count } => {
            let data = encode(&GenericPacket::new(session))?;
            for i in 0..count {
                client.socket.send_to(&data, client.server).await?;
                if i % 10_000 == 0 {
                    println!("{} sent", i);
                }
            }
            println!("Sent {} GENERIC packets", count);
        }
        Command::Create {
            account,
            name,
            race,
            profession,
        } => {
            let pc = PlayerCharacter::new(&account, &name, &race, &profession, "Tutorial");
            client.send(&CreatePlayerPacket::new(session, pc)).await?;
            client.print_replies().await;
        }
        Command::Clist { account } => {
            client.send(&ReqClistPacket::new(session, &account)).await?;
            client.print_replies().await;
        }
        Command::Connect { name } => {
            client.connect(&name).await?;
            client.disconnect().await?;
        }
        Command::Move { name, steps } => {
            client.connect(&name).await?;
            let mut rng = rand::thread_rng();
            for _ in 0..steps {
                let packet = MovePlayerPacket::new(
                    session,
                    rng.gen_range(-100.0..100.0),
                    rng.gen_range(-100.0..100.0),
                    rng.gen_range(0.0..10.0),
                    rng.gen_range(0.0..360.0),
                );
                client.send(&packet).await?;
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            client.print_replies().await;
            client.disconnect().await?;
        }
        Command::Say { name, message } => {
            client.connect(&name).await?;
            client.send(&SayCmdPacket::new(session, &message)).await?;
            client.print_replies().await;
            client.disconnect().await?;
        }
        Command::Whisper {
            name,
            target,
            message,
        } => {
            client.connect(&name).await?;
            client
                .send(&WhisperCmdPacket::new(session, &target, &message))
                .await?;
            client.print_replies().await;
            client.disconnect().await?;
        }
    }

    println!("Test client finished");
    Ok(())
}

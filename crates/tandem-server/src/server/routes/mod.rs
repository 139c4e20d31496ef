// Route modules for Tandem Server
pub mod assets; // index.html and /static
pub mod websocket; // Relay and echo WebSocket endpoints

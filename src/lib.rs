/*   Copyright 2024 Perry Lorier
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 *
 *  SPDX-License-Identifier: Apache-2.0
 *
 *  An RDAP routing gateway.
 *
 *  Incoming RDAP queries (autnum, ip, domain, nameserver, entity, help) are
 *  matched against routing data built from the IANA bootstrap registries
 *  (RFC 7484) and forwarded to one of the servers of the responsible
 *  registry.
 */

pub mod authority;
pub mod config;
pub mod directory;
pub mod http;
pub mod rdap;
pub mod resource;
pub mod scraper;
